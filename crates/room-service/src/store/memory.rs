//! In-memory `CallStore` used when no database is configured and by tests.

use super::{CallStore, StartedSession};
use crate::errors::RcError;
use crate::models::{
    ActivityKind, Attendance, CallSession, MediaFlags, ParticipantState, ParticipantStatus, Room,
};
use async_trait::async_trait;
use chrono::Utc;
use common::types::{RoomCode, SessionId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Call store backed by process memory. Every method holds the single inner
/// lock for its whole duration, which gives the same atomicity as one
/// Postgres transaction.
#[derive(Debug, Clone, Default)]
pub struct MemoryCallStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    rooms: HashMap<RoomCode, Room>,
    sessions: HashMap<SessionId, CallSession>,
    active: HashMap<RoomCode, SessionId>,
    attendance: Vec<Attendance>,
    participants: HashMap<(RoomCode, UserId), ParticipantState>,
}

impl MemoryCallStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn create_room(&self, code: &RoomCode, created_by: &UserId) -> Result<bool, RcError> {
        let mut inner = self.inner.lock().await;
        if inner.rooms.contains_key(code) {
            return Ok(false);
        }
        inner.rooms.insert(
            code.clone(),
            Room {
                code: code.clone(),
                created_by: created_by.clone(),
                is_open: true,
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn get_room(&self, code: &RoomCode) -> Result<Option<Room>, RcError> {
        Ok(self.inner.lock().await.rooms.get(code).cloned())
    }

    async fn close_room(&self, code: &RoomCode) -> Result<bool, RcError> {
        let mut inner = self.inner.lock().await;
        match inner.rooms.get_mut(code) {
            Some(room) => {
                room.is_open = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn start_session(&self, code: &RoomCode) -> Result<StartedSession, RcError> {
        let mut inner = self.inner.lock().await;

        if let Some(session) = inner
            .active
            .get(code)
            .and_then(|id| inner.sessions.get(id))
        {
            return Ok(StartedSession {
                session: session.clone(),
                created: false,
            });
        }

        let created_by = inner
            .rooms
            .get(code)
            .map(|room| room.created_by.clone())
            .ok_or_else(|| RcError::RoomNotFound(code.to_string()))?;

        let session = CallSession {
            id: SessionId::new(),
            room_code: code.clone(),
            created_by,
            started_at: Utc::now(),
            ended_at: None,
            participant_count: 0,
            message_count: 0,
            poll_count: 0,
            hand_raise_count: 0,
            recording_ref: None,
        };
        inner.active.insert(code.clone(), session.id);
        inner.sessions.insert(session.id, session.clone());

        Ok(StartedSession {
            session,
            created: true,
        })
    }

    async fn end_session(&self, code: &RoomCode) -> Result<Option<CallSession>, RcError> {
        let mut inner = self.inner.lock().await;
        let Some(id) = inner.active.remove(code) else {
            return Ok(None);
        };

        let now = Utc::now();
        for row in inner
            .attendance
            .iter_mut()
            .filter(|row| row.session_id == id && row.left_at.is_none())
        {
            row.left_at = Some(now.max(row.joined_at));
        }
        for participant in inner
            .participants
            .values_mut()
            .filter(|p| &p.room_code == code)
        {
            participant.status = ParticipantStatus::Left;
        }

        let ended = inner.sessions.get_mut(&id).map(|session| {
            session.ended_at = Some(now.max(session.started_at));
            session.clone()
        });
        Ok(ended)
    }

    async fn session(&self, id: SessionId) -> Result<Option<CallSession>, RcError> {
        Ok(self.inner.lock().await.sessions.get(&id).cloned())
    }

    async fn active_session(&self, code: &RoomCode) -> Result<Option<CallSession>, RcError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .active
            .get(code)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn set_participant_count(&self, id: SessionId, count: i64) -> Result<(), RcError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or(RcError::SessionNotFound)?;
        session.participant_count = count;
        Ok(())
    }

    async fn increment_counter(&self, id: SessionId, kind: ActivityKind) -> Result<(), RcError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or(RcError::SessionNotFound)?;
        match kind {
            ActivityKind::Message => session.message_count += 1,
            ActivityKind::Poll => session.poll_count += 1,
            ActivityKind::HandRaise => session.hand_raise_count += 1,
        }
        Ok(())
    }

    async fn open_attendance(&self, id: SessionId, user: &UserId) -> Result<bool, RcError> {
        let mut inner = self.inner.lock().await;

        let session_active = inner.sessions.get(&id).is_some_and(CallSession::is_active);
        if !session_active {
            return Ok(false);
        }

        let already_open = inner
            .attendance
            .iter()
            .any(|row| row.session_id == id && &row.user_id == user && row.is_open());
        if already_open {
            return Ok(false);
        }

        inner.attendance.push(Attendance {
            id: Uuid::new_v4(),
            session_id: id,
            user_id: user.clone(),
            joined_at: Utc::now(),
            left_at: None,
        });
        Ok(true)
    }

    async fn close_attendance(&self, id: SessionId, user: &UserId) -> Result<bool, RcError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut closed = false;
        for row in inner
            .attendance
            .iter_mut()
            .filter(|row| row.session_id == id && &row.user_id == user && row.left_at.is_none())
        {
            row.left_at = Some(now.max(row.joined_at));
            closed = true;
        }
        Ok(closed)
    }

    async fn attendance_for_session(&self, id: SessionId) -> Result<Vec<Attendance>, RcError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .attendance
            .iter()
            .filter(|row| row.session_id == id)
            .cloned()
            .collect())
    }

    async fn mark_participant_joined(
        &self,
        code: &RoomCode,
        user: &UserId,
    ) -> Result<ParticipantState, RcError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let room_has_participants = inner.participants.keys().any(|(room, _)| room == code);

        let state = inner
            .participants
            .entry((code.clone(), user.clone()))
            .and_modify(|p| {
                p.status = ParticipantStatus::Joined;
                p.last_active_at = now;
            })
            .or_insert_with(|| ParticipantState {
                room_code: code.clone(),
                user_id: user.clone(),
                is_host: !room_has_participants,
                status: ParticipantStatus::Joined,
                media: MediaFlags::default(),
                muted_by_host: false,
                last_active_at: now,
            });
        Ok(state.clone())
    }

    async fn mark_participant_left(&self, code: &RoomCode, user: &UserId) -> Result<(), RcError> {
        let mut inner = self.inner.lock().await;
        if let Some(p) = inner.participants.get_mut(&(code.clone(), user.clone())) {
            p.status = ParticipantStatus::Left;
            p.last_active_at = Utc::now();
        }
        Ok(())
    }

    async fn participant(
        &self,
        code: &RoomCode,
        user: &UserId,
    ) -> Result<Option<ParticipantState>, RcError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .participants
            .get(&(code.clone(), user.clone()))
            .cloned())
    }

    async fn count_joined(&self, code: &RoomCode) -> Result<i64, RcError> {
        let inner = self.inner.lock().await;
        let count = inner
            .participants
            .values()
            .filter(|p| &p.room_code == code && p.status == ParticipantStatus::Joined)
            .count();
        i64::try_from(count).map_err(|e| RcError::Internal(format!("count overflow: {e}")))
    }

    async fn update_media_state(
        &self,
        code: &RoomCode,
        user: &UserId,
        flags: MediaFlags,
    ) -> Result<bool, RcError> {
        let mut inner = self.inner.lock().await;
        match inner.participants.get_mut(&(code.clone(), user.clone())) {
            Some(p) => {
                p.media = flags;
                p.last_active_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_host_muted(
        &self,
        code: &RoomCode,
        user: &UserId,
        muted: bool,
    ) -> Result<bool, RcError> {
        let mut inner = self.inner.lock().await;
        match inner.participants.get_mut(&(code.clone(), user.clone())) {
            Some(p) => {
                p.muted_by_host = muted;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn code() -> RoomCode {
        "AB12CD34EF".parse().unwrap()
    }

    async fn store_with_room() -> MemoryCallStore {
        let store = MemoryCallStore::new();
        assert!(store
            .create_room(&code(), &UserId::from("creator"))
            .await
            .unwrap());
        store
    }

    #[tokio::test]
    async fn test_create_room_rejects_collision() {
        let store = store_with_room().await;
        assert!(!store
            .create_room(&code(), &UserId::from("other"))
            .await
            .unwrap());

        let room = store.get_room(&code()).await.unwrap().unwrap();
        assert_eq!(room.created_by.as_str(), "creator");
        assert!(room.is_open);
    }

    #[tokio::test]
    async fn test_start_session_is_idempotent() {
        let store = store_with_room().await;

        let first = store.start_session(&code()).await.unwrap();
        assert!(first.created);
        assert_eq!(first.session.created_by.as_str(), "creator");

        let second = store.start_session(&code()).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.session.id, second.session.id);
    }

    #[tokio::test]
    async fn test_start_session_unknown_room() {
        let store = MemoryCallStore::new();
        let result = store.start_session(&code()).await;
        assert!(matches!(result, Err(RcError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_end_session_closes_attendance_and_allows_new_session() {
        let store = store_with_room().await;
        let started = store.start_session(&code()).await.unwrap();
        let id = started.session.id;

        assert!(store
            .open_attendance(id, &UserId::from("alice"))
            .await
            .unwrap());
        let ended = store.end_session(&code()).await.unwrap().unwrap();
        assert!(!ended.is_active());

        let rows = store.attendance_for_session(id).await.unwrap();
        assert!(rows.iter().all(|r| r.left_at.is_some_and(|l| l >= r.joined_at)));

        assert!(store.end_session(&code()).await.unwrap().is_none());

        let fresh = store.start_session(&code()).await.unwrap();
        assert!(fresh.created);
        assert_ne!(fresh.session.id, id);
    }

    #[tokio::test]
    async fn test_open_attendance_refuses_duplicate_and_ended() {
        let store = store_with_room().await;
        let id = store.start_session(&code()).await.unwrap().session.id;
        let alice = UserId::from("alice");

        assert!(store.open_attendance(id, &alice).await.unwrap());
        assert!(!store.open_attendance(id, &alice).await.unwrap());

        assert!(store.close_attendance(id, &alice).await.unwrap());
        assert!(!store.close_attendance(id, &alice).await.unwrap());
        assert!(store.open_attendance(id, &alice).await.unwrap());
        assert_eq!(store.attendance_for_session(id).await.unwrap().len(), 2);

        store.end_session(&code()).await.unwrap();
        assert!(!store.open_attendance(id, &alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_host_flag_only_for_first_ever_participant() {
        let store = store_with_room().await;
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        assert!(store.mark_participant_joined(&code(), &alice).await.unwrap().is_host);
        assert!(!store.mark_participant_joined(&code(), &bob).await.unwrap().is_host);

        store.mark_participant_left(&code(), &alice).await.unwrap();
        store.mark_participant_left(&code(), &bob).await.unwrap();
        assert_eq!(store.count_joined(&code()).await.unwrap(), 0);

        // Bob rejoins an otherwise empty room and stays a non-host.
        assert!(!store.mark_participant_joined(&code(), &bob).await.unwrap().is_host);
        // Alice keeps her flag across rejoin.
        assert!(store.mark_participant_joined(&code(), &alice).await.unwrap().is_host);
        assert_eq!(store.count_joined(&code()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_counters() {
        let store = store_with_room().await;
        let id = store.start_session(&code()).await.unwrap().session.id;

        store.increment_counter(id, ActivityKind::Message).await.unwrap();
        store.increment_counter(id, ActivityKind::Message).await.unwrap();
        store.increment_counter(id, ActivityKind::HandRaise).await.unwrap();
        store.set_participant_count(id, 3).await.unwrap();

        let session = store.session(id).await.unwrap().unwrap();
        assert_eq!(session.message_count, 2);
        assert_eq!(session.poll_count, 0);
        assert_eq!(session.hand_raise_count, 1);
        assert_eq!(session.participant_count, 3);

        let missing = store
            .increment_counter(SessionId::new(), ActivityKind::Poll)
            .await;
        assert!(matches!(missing, Err(RcError::SessionNotFound)));
    }
}
