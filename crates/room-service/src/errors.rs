//! Room service error types.
//!
//! Errors map to a stable string code sent to clients in `error` frames and to
//! an HTTP status through the `IntoResponse` impl. Internal details are logged
//! server-side and never included in the client message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Room service error type.
///
/// Maps to client error codes:
/// - `Database`, `Config`, `Internal`: `INTERNAL_ERROR`
/// - `BadRequest`: `BAD_REQUEST`
/// - `RoomNotFound`, `SessionNotFound`: `NOT_FOUND`
/// - `RoomClosed`, `SessionEnded`: `GONE`
/// - `PermissionDenied`: `FORBIDDEN`
/// - `Conflict`: `CONFLICT`
/// - `RoomClosing`, `Draining`: `UNAVAILABLE`
#[derive(Debug, Error)]
pub enum RcError {
    /// Durable store operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request could not be decoded or is invalid.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Room does not exist.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room exists but was closed by its host.
    #[error("Room is closed")]
    RoomClosed,

    /// Call session does not exist.
    #[error("Session not found")]
    SessionNotFound,

    /// Call session already ended.
    #[error("Session has ended")]
    SessionEnded,

    /// Caller lacks the privilege for this action.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Conflicting state (e.g. room code collision).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Room actor is emptying and refuses new members.
    #[error("Room is closing")]
    RoomClosing,

    /// Service is shutting down.
    #[error("Service is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns the client-facing error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            RcError::Database(_) | RcError::Config(_) | RcError::Internal(_) => "INTERNAL_ERROR",
            RcError::BadRequest(_) => "BAD_REQUEST",
            RcError::RoomNotFound(_) | RcError::SessionNotFound => "NOT_FOUND",
            RcError::RoomClosed | RcError::SessionEnded => "GONE",
            RcError::PermissionDenied(_) => "FORBIDDEN",
            RcError::Conflict(_) => "CONFLICT",
            RcError::RoomClosing | RcError::Draining => "UNAVAILABLE",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::Database(_) | RcError::Config(_) | RcError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            RcError::BadRequest(msg) | RcError::PermissionDenied(msg) | RcError::Conflict(msg) => {
                msg.clone()
            }
            RcError::RoomNotFound(_) => "Room not found".to_string(),
            RcError::RoomClosed => "Room has been closed".to_string(),
            RcError::SessionNotFound => "Call session not found".to_string(),
            RcError::SessionEnded => "Call session has ended".to_string(),
            RcError::RoomClosing => "Room is closing, please retry".to_string(),
            RcError::Draining => "Server is shutting down, please reconnect".to_string(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            RcError::Database(_) | RcError::Config(_) | RcError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RcError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RcError::RoomNotFound(_) | RcError::SessionNotFound => StatusCode::NOT_FOUND,
            RcError::RoomClosed | RcError::SessionEnded => StatusCode::GONE,
            RcError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            RcError::Conflict(_) => StatusCode::CONFLICT,
            RcError::RoomClosing | RcError::Draining => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RcError {
    fn into_response(self) -> Response {
        match &self {
            RcError::Database(err) => {
                tracing::error!(target: "rc.store", error = %err, "Database operation failed");
            }
            RcError::Internal(err) => {
                tracing::error!(target: "rc.gateway", error = %err, "Internal error");
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for RcError {
    fn from(err: sqlx::Error) -> Self {
        RcError::Database(err.to_string())
    }
}

impl From<common::error::ProtocolError> for RcError {
    fn from(err: common::error::ProtocolError) -> Self {
        match err {
            common::error::ProtocolError::Rng => RcError::Internal(err.to_string()),
            other => RcError::BadRequest(other.to_string()),
        }
    }
}
