//! Message types for actor communication.
//!
//! Requests carry a `oneshot` reply channel; notifications do not.

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;
use crate::errors::RcError;
use common::protocol::ServerMessage;
use common::types::{ConnectionId, RoomCode, UserId};
use tokio::sync::oneshot;

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Return the live room for `room_code`, creating it if absent or if the
    /// current entry is vacating.
    GetOrCreateRoom {
        room_code: RoomCode,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// Return the live room for `room_code` without creating one.
    GetRoom {
        room_code: RoomCode,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },

    /// Snapshot of every live room, used for the disconnect scan.
    ListRooms {
        respond_to: oneshot::Sender<Vec<RoomActorHandle>>,
    },

    /// A room actor's member set became empty.
    RoomVacated { room_code: RoomCode, generation: u64 },

    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting rooms and cancel every child actor.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        user_id: UserId,
        connection: ConnectionActorHandle,
        respond_to: oneshot::Sender<Result<JoinResult, RcError>>,
    },

    /// Remove a connection.
    Leave {
        connection_id: ConnectionId,
        reason: LeaveReason,
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    /// Broadcast `room_ended`, remove every member and vacate.
    Close {
        respond_to: oneshot::Sender<Vec<ConnectionId>>,
    },

    /// Deliver a message to every connection joined as `user_id`.
    SendToUser {
        user_id: UserId,
        message: ServerMessage,
        respond_to: oneshot::Sender<usize>,
    },

    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Queue a message for the client.
    Deliver { message: ServerMessage },

    /// Close the client's channel.
    Close { reason: String },
}

/// Why a connection is being removed from a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// Explicit `leave_room`.
    Leave,
    /// Transport-level disconnect.
    Disconnect,
}

impl LeaveReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::Leave => "leave",
            LeaveReason::Disconnect => "disconnect",
        }
    }
}

/// Result of removing a connection from a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The connection was not a member.
    NotMember,
    /// Removed, and the user has no other connection in the room.
    Departed,
    /// Removed, but another connection of the same user is still joined
    /// (a second tab, or a reconnect that joined before this one was reaped).
    UserStillPresent,
}

impl LeaveOutcome {
    /// Whether the connection was removed.
    #[must_use]
    pub const fn removed(&self) -> bool {
        !matches!(self, LeaveOutcome::NotMember)
    }

    /// Whether the user is gone from the room, so attendance should close.
    #[must_use]
    pub const fn user_departed(&self) -> bool {
        matches!(self, LeaveOutcome::Departed)
    }
}

/// Result of joining a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinResult {
    /// Members present before the caller, in join order.
    pub existing_members: Vec<ConnectionId>,
    /// Whether the caller holds the host slot.
    pub is_host: bool,
    /// False when the connection was already a member.
    pub newly_joined: bool,
}

/// Snapshot of a room actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub room_code: RoomCode,
    pub generation: u64,
    /// Members in join order.
    pub members: Vec<ConnectionId>,
    pub host: Option<ConnectionId>,
    pub is_closing: bool,
}

/// Registry status for health checks and the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub room_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
