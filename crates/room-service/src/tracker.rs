//! Session & attendance tracker.
//!
//! Per room a call session moves `NoSession -> Active -> Ended`. An ended
//! session is immutable history; the next start creates a fresh id. Join and
//! leave events record attendance intervals and keep the session's live
//! participant count equal to the number of joined participants.
//!
//! Idempotence rests on the store: `open_attendance` refuses a second open
//! row for the same (session, user), so a repeated join is a no-op.

use crate::errors::RcError;
use crate::models::{ActivityKind, Attendance, CallSession, MediaFlags, ParticipantState};
use crate::observability::metrics;
use crate::store::CallStore;
use common::types::{RoomCode, SessionId, UserId};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Result of [`SessionTracker::track_join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedJoin {
    /// False when an open attendance row already existed.
    pub recorded: bool,
    pub is_host: bool,
    pub participant_count: i64,
}

/// Tracks call sessions, attendance and participant state for rooms.
#[derive(Clone)]
pub struct SessionTracker {
    store: Arc<dyn CallStore>,
}

impl SessionTracker {
    #[must_use]
    pub fn new(store: Arc<dyn CallStore>) -> Self {
        Self { store }
    }

    /// Return the room's active session, creating one if none is active.
    ///
    /// # Errors
    ///
    /// `RcError::RoomNotFound` if the room does not exist; store errors.
    #[instrument(skip_all, name = "rc.tracker.start_session", fields(room_code = %room_code))]
    pub async fn start_session(&self, room_code: &RoomCode) -> Result<CallSession, RcError> {
        let started = self.store.start_session(room_code).await?;
        if started.created {
            info!(
                target: "rc.tracker",
                room_code = %room_code,
                session_id = %started.session.id,
                "Call session started"
            );
            metrics::record_tracker_operation("start_session", "created");
        } else {
            metrics::record_tracker_operation("start_session", "existing");
        }
        Ok(started.session)
    }

    /// End the room's active session and close its open attendance.
    ///
    /// Returns the ended session, or `None` if no session was active.
    ///
    /// # Errors
    ///
    /// Store errors.
    #[instrument(skip_all, name = "rc.tracker.end_session", fields(room_code = %room_code))]
    pub async fn end_session(&self, room_code: &RoomCode) -> Result<Option<CallSession>, RcError> {
        let ended = self.store.end_session(room_code).await?;
        match &ended {
            Some(session) => {
                info!(
                    target: "rc.tracker",
                    room_code = %room_code,
                    session_id = %session.id,
                    "Call session ended"
                );
                metrics::record_tracker_operation("end_session", "ended");
            }
            None => metrics::record_tracker_operation("end_session", "noop"),
        }
        Ok(ended)
    }

    /// Record that `user_id` joined the session.
    ///
    /// A join while the user already has an open attendance row changes
    /// nothing. Otherwise an attendance row is opened, the participant is
    /// marked joined (the first-ever participant of the room becomes host)
    /// and the live participant count is recomputed.
    ///
    /// # Errors
    ///
    /// `RcError::SessionNotFound`, `RcError::SessionEnded`; store errors.
    #[instrument(skip_all, name = "rc.tracker.track_join", fields(session_id = %session_id))]
    pub async fn track_join(
        &self,
        session_id: SessionId,
        user_id: &UserId,
    ) -> Result<TrackedJoin, RcError> {
        let session = self.active(session_id).await?;

        if !self.store.open_attendance(session_id, user_id).await? {
            // Either a duplicate join or the session ended in between.
            let session = self.active(session_id).await?;
            let is_host = self
                .store
                .participant(&session.room_code, user_id)
                .await?
                .is_some_and(|p| p.is_host);

            debug!(
                target: "rc.tracker",
                session_id = %session_id,
                user_id = %user_id,
                "Attendance already open, join ignored"
            );
            metrics::record_tracker_operation("track_join", "noop");

            return Ok(TrackedJoin {
                recorded: false,
                is_host,
                participant_count: session.participant_count,
            });
        }

        let participant = self
            .store
            .mark_participant_joined(&session.room_code, user_id)
            .await?;
        let participant_count = self.recount(&session).await?;

        debug!(
            target: "rc.tracker",
            session_id = %session_id,
            room_code = %session.room_code,
            user_id = %user_id,
            is_host = participant.is_host,
            participant_count,
            "Join tracked"
        );
        metrics::record_tracker_operation("track_join", "recorded");

        Ok(TrackedJoin {
            recorded: true,
            is_host: participant.is_host,
            participant_count,
        })
    }

    /// Record that `user_id` left the session.
    ///
    /// Returns the recomputed participant count.
    ///
    /// # Errors
    ///
    /// `RcError::SessionNotFound`, `RcError::SessionEnded`; store errors.
    #[instrument(skip_all, name = "rc.tracker.track_leave", fields(session_id = %session_id))]
    pub async fn track_leave(&self, session_id: SessionId, user_id: &UserId) -> Result<i64, RcError> {
        let session = self.active(session_id).await?;

        let closed = self.store.close_attendance(session_id, user_id).await?;
        if closed {
            self.store
                .mark_participant_left(&session.room_code, user_id)
                .await?;
        }
        let participant_count = self.recount(&session).await?;

        debug!(
            target: "rc.tracker",
            session_id = %session_id,
            room_code = %session.room_code,
            user_id = %user_id,
            closed,
            participant_count,
            "Leave tracked"
        );
        metrics::record_tracker_operation("track_leave", if closed { "recorded" } else { "noop" });

        Ok(participant_count)
    }

    /// Bump a session activity counter.
    ///
    /// # Errors
    ///
    /// `RcError::SessionNotFound`, `RcError::SessionEnded`; store errors.
    pub async fn record_activity(
        &self,
        session_id: SessionId,
        kind: ActivityKind,
    ) -> Result<(), RcError> {
        self.active(session_id).await?;
        self.store.increment_counter(session_id, kind).await?;
        metrics::record_tracker_operation("record_activity", kind.as_str());
        Ok(())
    }

    /// Store the media flags reported by a participant.
    ///
    /// # Errors
    ///
    /// `RcError::PermissionDenied` if the user is not a participant of the
    /// room; store errors.
    pub async fn update_media_state(
        &self,
        room_code: &RoomCode,
        user_id: &UserId,
        flags: MediaFlags,
    ) -> Result<(), RcError> {
        if self
            .store
            .update_media_state(room_code, user_id, flags)
            .await?
        {
            Ok(())
        } else {
            Err(RcError::PermissionDenied(
                "Not a participant of this room".to_string(),
            ))
        }
    }

    /// Whether `user_id` may act as host: the room creator or the participant
    /// holding the host flag.
    ///
    /// # Errors
    ///
    /// `RcError::RoomNotFound` if the room does not exist; store errors.
    pub async fn is_host(&self, room_code: &RoomCode, user_id: &UserId) -> Result<bool, RcError> {
        let room = self
            .store
            .get_room(room_code)
            .await?
            .ok_or_else(|| RcError::RoomNotFound(room_code.to_string()))?;

        if &room.created_by == user_id {
            return Ok(true);
        }

        Ok(self
            .store
            .participant(room_code, user_id)
            .await?
            .is_some_and(|p| p.is_host))
    }

    /// Set the mute-by-host flag of `target`. Only a host may do this; a
    /// rejected request mutates nothing.
    ///
    /// # Errors
    ///
    /// `RcError::PermissionDenied` if `host` is not a host or `target` is not a
    /// participant; store errors.
    #[instrument(skip_all, name = "rc.tracker.host_mute", fields(room_code = %room_code))]
    pub async fn host_mute(
        &self,
        room_code: &RoomCode,
        host: &UserId,
        target: &UserId,
        muted: bool,
    ) -> Result<(), RcError> {
        if !self.is_host(room_code, host).await? {
            metrics::record_tracker_operation("host_mute", "denied");
            return Err(RcError::PermissionDenied(
                "Only the host can mute participants".to_string(),
            ));
        }

        if !self.store.set_host_muted(room_code, target, muted).await? {
            return Err(RcError::PermissionDenied(
                "Target is not a participant of this room".to_string(),
            ));
        }

        info!(
            target: "rc.tracker",
            room_code = %room_code,
            host = %host,
            target_user = %target,
            muted,
            "Host changed participant mute"
        );
        metrics::record_tracker_operation("host_mute", "applied");
        Ok(())
    }

    /// The room's active session, if any.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn active_session(&self, room_code: &RoomCode) -> Result<Option<CallSession>, RcError> {
        self.store.active_session(room_code).await
    }

    /// Attendance history of a session.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn attendance(&self, session_id: SessionId) -> Result<Vec<Attendance>, RcError> {
        self.store.attendance_for_session(session_id).await
    }

    /// Participant record of a user in a room.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn participant(
        &self,
        room_code: &RoomCode,
        user_id: &UserId,
    ) -> Result<Option<ParticipantState>, RcError> {
        self.store.participant(room_code, user_id).await
    }

    async fn active(&self, session_id: SessionId) -> Result<CallSession, RcError> {
        match self.store.session(session_id).await? {
            Some(session) if session.is_active() => Ok(session),
            Some(_) => Err(RcError::SessionEnded),
            None => Err(RcError::SessionNotFound),
        }
    }

    async fn recount(&self, session: &CallSession) -> Result<i64, RcError> {
        let count = self.store.count_joined(&session.room_code).await?;
        self.store.set_participant_count(session.id, count).await?;
        Ok(count)
    }
}
