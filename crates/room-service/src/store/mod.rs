//! Durable store interface for rooms, call sessions, attendance and
//! participant state.
//!
//! Every method is atomic on its own: idempotence guarantees (one active
//! session per room, one open attendance row per user and session, the
//! first-ever-joiner host rule) are enforced inside the store rather than by
//! check-then-write sequences in callers.

mod memory;
mod postgres;

pub use memory::MemoryCallStore;
pub use postgres::PgCallStore;

use crate::errors::RcError;
use crate::models::{ActivityKind, Attendance, CallSession, MediaFlags, ParticipantState, Room};
use async_trait::async_trait;
use common::types::{RoomCode, SessionId, UserId};

/// Outcome of [`CallStore::start_session`].
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session: CallSession,
    /// False when an already-active session was returned.
    pub created: bool,
}

#[async_trait]
pub trait CallStore: Send + Sync {
    /// Insert a room. Returns `false` if the code is already taken.
    async fn create_room(&self, code: &RoomCode, created_by: &UserId) -> Result<bool, RcError>;

    async fn get_room(&self, code: &RoomCode) -> Result<Option<Room>, RcError>;

    /// Mark a room closed. Returns `false` if the room does not exist.
    async fn close_room(&self, code: &RoomCode) -> Result<bool, RcError>;

    /// Return the room's active session, or create one attributed to the room
    /// creator.
    ///
    /// # Errors
    ///
    /// `RcError::RoomNotFound` if the room does not exist.
    async fn start_session(&self, code: &RoomCode) -> Result<StartedSession, RcError>;

    /// End the room's active session and close all of its open attendance rows
    /// in one transaction. Participants of the room are marked left.
    ///
    /// Returns the ended session, or `None` if none was active.
    async fn end_session(&self, code: &RoomCode) -> Result<Option<CallSession>, RcError>;

    async fn session(&self, id: SessionId) -> Result<Option<CallSession>, RcError>;

    async fn active_session(&self, code: &RoomCode) -> Result<Option<CallSession>, RcError>;

    async fn set_participant_count(&self, id: SessionId, count: i64) -> Result<(), RcError>;

    async fn increment_counter(&self, id: SessionId, kind: ActivityKind) -> Result<(), RcError>;

    /// Open an attendance row unless one is already open for (session, user)
    /// or the session has ended. Returns `true` if a row was opened.
    async fn open_attendance(&self, id: SessionId, user: &UserId) -> Result<bool, RcError>;

    /// Close the open attendance row for (session, user). Returns `true` if a
    /// row was closed.
    async fn close_attendance(&self, id: SessionId, user: &UserId) -> Result<bool, RcError>;

    /// All attendance rows of a session in join order.
    async fn attendance_for_session(&self, id: SessionId) -> Result<Vec<Attendance>, RcError>;

    /// Upsert the participant as joined. The host flag is set only when the
    /// room had no participant record at all; existing records keep theirs.
    async fn mark_participant_joined(
        &self,
        code: &RoomCode,
        user: &UserId,
    ) -> Result<ParticipantState, RcError>;

    async fn mark_participant_left(&self, code: &RoomCode, user: &UserId) -> Result<(), RcError>;

    async fn participant(
        &self,
        code: &RoomCode,
        user: &UserId,
    ) -> Result<Option<ParticipantState>, RcError>;

    /// Number of participants of the room with `joined` status.
    async fn count_joined(&self, code: &RoomCode) -> Result<i64, RcError>;

    /// Returns `false` if the participant does not exist.
    async fn update_media_state(
        &self,
        code: &RoomCode,
        user: &UserId,
        flags: MediaFlags,
    ) -> Result<bool, RcError>;

    /// Returns `false` if the participant does not exist.
    async fn set_host_muted(
        &self,
        code: &RoomCode,
        user: &UserId,
        muted: bool,
    ) -> Result<bool, RcError>;
}
