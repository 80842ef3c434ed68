//! Common types shared by the room service and the room client.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for identifier newtypes (room codes, connection/user/session ids)
pub mod types;

/// Module for the JSON signaling protocol
pub mod protocol;

/// Module for secret types that prevent accidental logging
pub mod secret;
