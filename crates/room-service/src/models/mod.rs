//! Durable entities owned by the call store.

use chrono::{DateTime, Utc};
use common::types::{RoomCode, SessionId, UserId};
use serde::Serialize;
use uuid::Uuid;

/// A room as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub code: RoomCode,
    pub created_by: UserId,
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
}

/// One continuous call occurrence within a room.
///
/// `ended_at` is `None` while the session is active. At most one active
/// session exists per room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSession {
    pub id: SessionId,
    pub room_code: RoomCode,
    pub created_by: UserId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub participant_count: i64,
    pub message_count: i64,
    pub poll_count: i64,
    pub hand_raise_count: i64,
    pub recording_ref: Option<String>,
}

impl CallSession {
    /// Whether the session has not ended yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// One join/leave interval of a user within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attendance {
    pub id: Uuid,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl Attendance {
    /// Whether the user is still present in this interval.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Presence of a participant in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Joined,
    Left,
}

impl ParticipantStatus {
    /// Column value used by the Postgres store.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Joined => "joined",
            ParticipantStatus::Left => "left",
        }
    }

    /// Parse a column value. Unknown values read as `Left`.
    #[must_use]
    pub fn from_db(value: &str) -> Self {
        if value == "joined" {
            ParticipantStatus::Joined
        } else {
            ParticipantStatus::Left
        }
    }
}

/// Media flags reported by a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaFlags {
    pub video: bool,
    pub audio: bool,
    pub screen_share: bool,
}

impl Default for MediaFlags {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
            screen_share: false,
        }
    }
}

/// Per (room, user) participant record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantState {
    pub room_code: RoomCode,
    pub user_id: UserId,
    /// True only for the first-ever participant of the room.
    pub is_host: bool,
    pub status: ParticipantStatus,
    pub media: MediaFlags,
    pub muted_by_host: bool,
    pub last_active_at: DateTime<Utc>,
}

/// Session counters bumped by in-call activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Message,
    Poll,
    HandRaise,
}

impl ActivityKind {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Message => "message",
            ActivityKind::Poll => "poll",
            ActivityKind::HandRaise => "hand_raise",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_status_round_trip() {
        assert_eq!(
            ParticipantStatus::from_db(ParticipantStatus::Joined.as_str()),
            ParticipantStatus::Joined
        );
        assert_eq!(
            ParticipantStatus::from_db(ParticipantStatus::Left.as_str()),
            ParticipantStatus::Left
        );
        assert_eq!(ParticipantStatus::from_db("bogus"), ParticipantStatus::Left);
    }

    #[test]
    fn test_default_media_flags() {
        let flags = MediaFlags::default();
        assert!(flags.video && flags.audio);
        assert!(!flags.screen_share);
    }
}
