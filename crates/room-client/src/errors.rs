//! Client error types.

use crate::media::MediaAccessError;
use common::types::RoomCode;
use thiserror::Error;

/// Errors surfaced to the application.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Every reconnect attempt failed.
    #[error("Signaling connection failed after {attempts} attempts")]
    SignalingConnectionFailed { attempts: u32 },

    /// No signaling channel is open.
    #[error("Signaling channel is not connected")]
    NotConnected,

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in room {0}")]
    AlreadyInRoom(RoomCode),

    /// The server did not acknowledge a join in time.
    #[error("Join was not acknowledged")]
    JoinTimeout,

    /// The room was left or ended before the join was acknowledged.
    #[error("Join was cancelled")]
    JoinCancelled,

    /// The server rejected a request.
    #[error("Server error {code}: {message}")]
    Server { code: String, message: String },

    /// Local capture failed for every constraint set.
    #[error(transparent)]
    Media(#[from] MediaAccessError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The client was shut down.
    #[error("Client is shut down")]
    Closed,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Signaling transport failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Channel closed")]
    Closed,
}

/// Failures of one peer link. Never fatal for the room.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    #[error("Peer connection could not be created: {0}")]
    Connect(String),

    #[error("Negotiation payload rejected: {0}")]
    Negotiation(String),

    #[error("Track replacement failed: {0}")]
    Track(String),

    #[error("Peer connection already closed")]
    Closed,
}
