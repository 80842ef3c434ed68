//! Room REST handlers.
//!
//! - `POST /api/v1/rooms` - create a room, `201 {room_code}`
//! - `GET /api/v1/rooms/{code}` - room metadata plus live state
//!
//! The caller's user id is taken from the request body as-is; authentication
//! belongs to the surrounding application.

use super::AppState;
use crate::errors::RcError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use common::types::{RoomCode, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Body of `POST /api/v1/rooms`.
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub creator_id: UserId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room_code: RoomCode,
}

/// Body of `GET /api/v1/rooms/{code}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoomResponse {
    pub room_code: RoomCode,
    pub created_by: UserId,
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
    /// Connections currently joined on this instance.
    pub live_members: usize,
    pub active_session_id: Option<SessionId>,
    pub participant_count: i64,
}

/// Handler for `POST /api/v1/rooms`.
///
/// # Errors
///
/// `RcError::BadRequest` for an empty creator id; store errors.
#[instrument(skip_all, name = "rc.gateway.create_room")]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), RcError> {
    if request.creator_id.as_str().trim().is_empty() {
        return Err(RcError::BadRequest("creator_id is required".to_string()));
    }

    let room_code = state.rooms.create_room(&request.creator_id).await?;
    Ok((StatusCode::CREATED, Json(CreateRoomResponse { room_code })))
}

/// Handler for `GET /api/v1/rooms/{code}`.
///
/// # Errors
///
/// `RcError::BadRequest` for a malformed code, `RcError::RoomNotFound`.
#[instrument(skip_all, name = "rc.gateway.get_room", fields(room_code = %code))]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<RoomResponse>, RcError> {
    let room_code: RoomCode = code.parse()?;
    let room = state.rooms.get_room(&room_code).await?;
    let live_members = state.registry.members(&room_code).await?.len();
    let session = state.tracker.active_session(&room_code).await?;

    Ok(Json(RoomResponse {
        room_code: room.code,
        created_by: room.created_by,
        is_open: room.is_open,
        created_at: room.created_at,
        live_members,
        active_session_id: session.as_ref().map(|s| s.id),
        participant_count: session.map_or(0, |s| s.participant_count),
    }))
}
