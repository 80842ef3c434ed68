//! Signaling channel handler.
//!
//! Each upgraded socket gets a fresh `ConnectionId` and a `ConnectionActor`
//! that rooms and the relay deliver through. A writer task serialises every
//! outbound `ServerMessage` as one JSON text frame; the reader loop decodes
//! `ClientMessage`s and dispatches them in arrival order.
//!
//! Tracker updates are best-effort: a store failure is logged and never
//! fails a join or leave that the registry already applied.

use super::AppState;
use crate::actors::{ConnectionActorHandle, LeaveOutcome, LeaveReason};
use crate::errors::RcError;
use crate::models::MediaFlags;
use crate::observability::metrics;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use common::protocol::{ClientMessage, ServerMessage};
use common::types::{ConnectionId, RoomCode, SessionId, UserId};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Frames queued for the socket writer.
const OUTBOUND_BUFFER: usize = 256;

/// Handler for `GET /ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let connection_id = ConnectionId::new();
    ws.on_upgrade(move |socket| handle_socket(socket, state, connection_id))
}

/// A room this socket joined, as seen by the gateway.
#[derive(Debug)]
struct JoinedRoom {
    user_id: UserId,
    /// `None` when the tracker could not record the join.
    session_id: Option<SessionId>,
}

struct SignalingSession {
    state: Arc<AppState>,
    connection: ConnectionActorHandle,
    /// Direct replies to this client, written in order.
    replies: mpsc::Sender<ServerMessage>,
    rooms: HashMap<RoomCode, JoinedRoom>,
}

#[instrument(skip_all, name = "rc.gateway.socket", fields(connection_id = %connection_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, connection_id: ConnectionId) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "rc.gateway", error = %e, "Failed to encode server message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let (connection, connection_task) = state
        .registry
        .spawn_connection(connection_id.clone(), outbound_tx.clone());
    state.directory.register(connection.clone()).await;
    let shutdown = state.registry.child_token();

    let mut session = SignalingSession {
        state: Arc::clone(&state),
        connection,
        replies: outbound_tx,
        rooms: HashMap::new(),
    };

    session
        .reply(ServerMessage::Welcome {
            connection_id: connection_id.clone(),
        })
        .await;

    info!(
        target: "rc.gateway",
        connection_id = %connection_id,
        "Signaling channel opened"
    );

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!(
                    target: "rc.gateway",
                    connection_id = %connection_id,
                    "Shutdown requested, closing signaling channel"
                );
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                    Some(Ok(Message::Binary(_))) => {
                        session
                            .reply_error(&RcError::BadRequest(
                                "Binary frames are not supported".to_string(),
                            ))
                            .await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/pong frames are answered by the server runtime.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(
                            target: "rc.gateway",
                            connection_id = %connection_id,
                            error = %e,
                            "Socket read failed"
                        );
                        break;
                    }
                }
            }
        }
    }

    session.disconnect().await;
    state.directory.unregister(&connection_id).await;

    // The writer ends once both the actor and the reply sender are gone.
    let SignalingSession {
        connection,
        replies,
        ..
    } = session;
    connection.cancel();
    drop(replies);
    let _ = connection_task.await;
    let _ = writer.await;

    info!(
        target: "rc.gateway",
        connection_id = %connection_id,
        "Signaling channel closed"
    );
}

impl SignalingSession {
    fn connection_id(&self) -> &ConnectionId {
        self.connection.connection_id()
    }

    async fn handle_text(&mut self, text: &str) {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    target: "rc.gateway",
                    connection_id = %self.connection_id(),
                    error = %e,
                    "Undecodable client frame"
                );
                self.reply_error(&RcError::from(e)).await;
                return;
            }
        };

        let kind = message.kind();
        metrics::record_message_received(kind);

        if let Err(e) = self.dispatch(message).await {
            match &e {
                RcError::Database(_) | RcError::Config(_) | RcError::Internal(_) => {
                    warn!(
                        target: "rc.gateway",
                        connection_id = %self.connection_id(),
                        message_type = kind,
                        error = %e,
                        "Client request failed"
                    );
                }
                _ => {
                    debug!(
                        target: "rc.gateway",
                        connection_id = %self.connection_id(),
                        message_type = kind,
                        error = %e,
                        "Client request rejected"
                    );
                }
            }
            self.reply_error(&e).await;
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<(), RcError> {
        match message {
            ClientMessage::JoinRoom { room_code, user_id } => self.join(room_code, user_id).await,

            ClientMessage::LeaveRoom { room_code } => self.leave(&room_code).await,

            ClientMessage::Signal { to, payload } => {
                let from = self.connection_id().clone();
                self.state.relay.relay(&from, &to, payload).await;
                Ok(())
            }

            ClientMessage::CloseRoom { room_code } => self.close_room(&room_code).await,

            ClientMessage::MediaState {
                room_code,
                video,
                audio,
                screen_share,
            } => {
                let user_id = self.joined_user(&room_code)?;
                self.state
                    .tracker
                    .update_media_state(
                        &room_code,
                        &user_id,
                        MediaFlags {
                            video,
                            audio,
                            screen_share,
                        },
                    )
                    .await
            }

            ClientMessage::HostMute {
                room_code,
                target_user_id,
                muted,
            } => self.host_mute(room_code, &target_user_id, muted).await,

            ClientMessage::Ping => {
                self.reply(ServerMessage::Pong).await;
                Ok(())
            }
        }
    }

    /// Validate the room, join the registry, then track the session join.
    async fn join(&mut self, room_code: RoomCode, user_id: UserId) -> Result<(), RcError> {
        if user_id.as_str().trim().is_empty() {
            return Err(RcError::BadRequest("user_id is required".to_string()));
        }

        self.state.rooms.ensure_open(&room_code).await?;

        let joined = self
            .state
            .registry
            .join(&room_code, &user_id, &self.connection)
            .await?;
        if joined.newly_joined {
            metrics::record_join();
        }

        let session_id = self.track_join(&room_code, &user_id).await;

        info!(
            target: "rc.gateway",
            connection_id = %self.connection_id(),
            room_code = %room_code,
            user_id = %user_id,
            is_host = joined.is_host,
            existing_members = joined.existing_members.len(),
            "Joined room"
        );

        self.rooms.insert(
            room_code.clone(),
            JoinedRoom {
                user_id,
                session_id,
            },
        );

        self.reply(ServerMessage::Joined {
            room_code,
            members: joined.existing_members,
            is_host: joined.is_host,
            session_id,
        })
        .await;
        Ok(())
    }

    async fn leave(&mut self, room_code: &RoomCode) -> Result<(), RcError> {
        let outcome = self
            .state
            .registry
            .leave(room_code, self.connection.connection_id())
            .await?;
        let joined = self.rooms.remove(room_code);

        if outcome.removed() {
            metrics::record_leave(LeaveReason::Leave.as_str());
        }
        if let Some(joined) = joined {
            self.track_departure(room_code, &joined, outcome).await;
        }
        Ok(())
    }

    async fn close_room(&mut self, room_code: &RoomCode) -> Result<(), RcError> {
        let user_id = self.joined_user(room_code)?;
        self.state.rooms.close_room(room_code, &user_id).await?;
        self.rooms.remove(room_code);
        Ok(())
    }

    async fn host_mute(
        &mut self,
        room_code: RoomCode,
        target: &UserId,
        muted: bool,
    ) -> Result<(), RcError> {
        let host = self.joined_user(&room_code)?;
        self.state
            .tracker
            .host_mute(&room_code, &host, target, muted)
            .await?;

        let reached = self
            .state
            .registry
            .send_to_user(
                &room_code,
                target,
                ServerMessage::MutedByHost {
                    room_code: room_code.clone(),
                    muted,
                },
            )
            .await?;

        debug!(
            target: "rc.gateway",
            room_code = %room_code,
            target_user = %target,
            connections_reached = reached,
            "Mute forwarded"
        );
        Ok(())
    }

    /// Remove this connection from every room after the socket ended.
    async fn disconnect(&mut self) {
        let connection_id = self.connection_id().clone();
        match self.state.registry.disconnect(&connection_id).await {
            Ok(left) => {
                for (room_code, outcome) in left {
                    metrics::record_leave(LeaveReason::Disconnect.as_str());
                    if let Some(joined) = self.rooms.remove(&room_code) {
                        self.track_departure(&room_code, &joined, outcome).await;
                    }
                }
            }
            Err(e) => {
                warn!(
                    target: "rc.gateway",
                    connection_id = %connection_id,
                    error = %e,
                    "Disconnect cleanup failed"
                );
            }
        }
    }

    async fn track_join(&self, room_code: &RoomCode, user_id: &UserId) -> Option<SessionId> {
        let tracked = async {
            let session = self.state.tracker.start_session(room_code).await?;
            self.state.tracker.track_join(session.id, user_id).await?;
            Ok::<_, RcError>(session.id)
        }
        .await;

        match tracked {
            Ok(session_id) => Some(session_id),
            Err(e) => {
                warn!(
                    target: "rc.gateway",
                    room_code = %room_code,
                    user_id = %user_id,
                    error = %e,
                    "Failed to track join"
                );
                None
            }
        }
    }

    /// Close attendance once the user has no connection left in the room.
    async fn track_departure(
        &self,
        room_code: &RoomCode,
        joined: &JoinedRoom,
        outcome: LeaveOutcome,
    ) {
        if !outcome.user_departed() {
            if outcome.removed() {
                debug!(
                    target: "rc.gateway",
                    room_code = %room_code,
                    user_id = %joined.user_id,
                    "User still joined on another connection, attendance kept open"
                );
            }
            return;
        }
        let Some(session_id) = joined.session_id else {
            return;
        };

        match self
            .state
            .tracker
            .track_leave(session_id, &joined.user_id)
            .await
        {
            Ok(_) => {}
            // The host ended the session; attendance is already closed.
            Err(RcError::SessionEnded) => {}
            Err(e) => {
                warn!(
                    target: "rc.gateway",
                    room_code = %room_code,
                    user_id = %joined.user_id,
                    error = %e,
                    "Failed to track leave"
                );
            }
        }
    }

    fn joined_user(&self, room_code: &RoomCode) -> Result<UserId, RcError> {
        self.rooms
            .get(room_code)
            .map(|joined| joined.user_id.clone())
            .ok_or_else(|| RcError::PermissionDenied("Not joined to this room".to_string()))
    }

    async fn reply(&self, message: ServerMessage) {
        if self.replies.send(message).await.is_err() {
            debug!(
                target: "rc.gateway",
                connection_id = %self.connection_id(),
                "Socket writer gone, reply dropped"
            );
        }
    }

    async fn reply_error(&self, error: &RcError) {
        self.reply(ServerMessage::error(
            error.error_code(),
            error.client_message(),
        ))
        .await;
    }
}
