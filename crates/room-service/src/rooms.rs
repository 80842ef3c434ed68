//! Room lifecycle at the service boundary: create, host check, close.

use crate::actors::RoomRegistryHandle;
use crate::errors::RcError;
use crate::models::Room;
use crate::store::CallStore;
use crate::tracker::SessionTracker;
use common::types::{RoomCode, UserId};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Room operations that span the store, the tracker and the live registry.
#[derive(Clone)]
pub struct RoomService {
    store: Arc<dyn CallStore>,
    tracker: SessionTracker,
    registry: RoomRegistryHandle,
    max_code_attempts: u32,
}

impl RoomService {
    #[must_use]
    pub fn new(
        store: Arc<dyn CallStore>,
        tracker: SessionTracker,
        registry: RoomRegistryHandle,
        max_code_attempts: u32,
    ) -> Self {
        Self {
            store,
            tracker,
            registry,
            max_code_attempts,
        }
    }

    /// Create a room owned by `creator` under a fresh random code.
    ///
    /// Codes are regenerated until the store confirms a unique insert.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` after `max_code_attempts` collisions; store errors.
    #[instrument(skip_all, name = "rc.rooms.create_room")]
    pub async fn create_room(&self, creator: &UserId) -> Result<RoomCode, RcError> {
        for attempt in 1..=self.max_code_attempts {
            let code = RoomCode::generate()?;
            if self.store.create_room(&code, creator).await? {
                info!(
                    target: "rc.rooms",
                    room_code = %code,
                    creator = %creator,
                    attempt,
                    "Room created"
                );
                return Ok(code);
            }

            warn!(
                target: "rc.rooms",
                attempt,
                max_attempts = self.max_code_attempts,
                "Room code collision, regenerating"
            );
        }

        Err(RcError::Internal(format!(
            "no unique room code after {} attempts",
            self.max_code_attempts
        )))
    }

    /// Look up a room.
    ///
    /// # Errors
    ///
    /// `RcError::RoomNotFound`; store errors.
    pub async fn get_room(&self, code: &RoomCode) -> Result<Room, RcError> {
        self.store
            .get_room(code)
            .await?
            .ok_or_else(|| RcError::RoomNotFound(code.to_string()))
    }

    /// Fail unless the room exists and is open.
    ///
    /// # Errors
    ///
    /// `RcError::RoomNotFound`, `RcError::RoomClosed`; store errors.
    pub async fn ensure_open(&self, code: &RoomCode) -> Result<Room, RcError> {
        let room = self.get_room(code).await?;
        if room.is_open {
            Ok(room)
        } else {
            Err(RcError::RoomClosed)
        }
    }

    /// Whether `user` is the room creator or holds the participant host flag.
    ///
    /// # Errors
    ///
    /// `RcError::RoomNotFound`; store errors.
    pub async fn is_host(&self, code: &RoomCode, user: &UserId) -> Result<bool, RcError> {
        self.tracker.is_host(code, user).await
    }

    /// End the room for everyone.
    ///
    /// Non-hosts are rejected before anything is mutated. Otherwise the room
    /// is marked closed, its active session ends (closing all open
    /// attendance) and every live member receives `room_ended`.
    ///
    /// # Errors
    ///
    /// `RcError::PermissionDenied`, `RcError::RoomNotFound`; store errors.
    #[instrument(skip_all, name = "rc.rooms.close_room", fields(room_code = %code))]
    pub async fn close_room(&self, code: &RoomCode, user: &UserId) -> Result<(), RcError> {
        if !self.is_host(code, user).await? {
            warn!(
                target: "rc.rooms",
                room_code = %code,
                user_id = %user,
                "Non-host attempted to close room"
            );
            return Err(RcError::PermissionDenied(
                "Only the host can close the room".to_string(),
            ));
        }

        self.store.close_room(code).await?;
        let ended = self.tracker.end_session(code).await?;
        let notified = self.registry.close_room(code).await?;

        info!(
            target: "rc.rooms",
            room_code = %code,
            closed_by = %user,
            session_id = ?ended.map(|s| s.id),
            members_notified = notified.len(),
            "Room closed"
        );
        Ok(())
    }
}
