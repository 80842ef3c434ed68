//! Common error types for identifier parsing and protocol decoding.

use thiserror::Error;

/// Errors raised while parsing identifiers or decoding protocol frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Room code is not 10 characters of `[A-Z0-9]`
    #[error("Invalid room code: {0}")]
    InvalidRoomCode(String),

    /// Session id is not a UUID
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// Frame could not be decoded
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Random source failed
    #[error("Random generator failure")]
    Rng,
}

/// Result type alias using `ProtocolError`
pub type Result<T> = std::result::Result<T, ProtocolError>;
