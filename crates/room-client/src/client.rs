//! `RoomClient` - the application-facing client.
//!
//! Wires the connection supervisor to the peer orchestrator:
//!
//! ```text
//! ConnectionSupervisor ──inbound──► router task ──► PeerOrchestrator
//!        ▲                                                │
//!        └──────────── signal forwarder ◄──── ClientMessage::Signal
//!
//! SupervisorEvent ──► events task (re-join after Reconnected, notices)
//! ```
//!
//! Everything the user should see but that does not block the call (media
//! downgrades, per-peer failures, room ended) arrives as a [`ClientNotice`]
//! on the receiver returned by [`RoomClient::new`].

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::media::{
    acquire_local_media, MediaAccessError, MediaConstraints, MediaDevices, MediaWarning,
};
use crate::peers::{
    OrchestratorStatus, PeerConnector, PeerOrchestrator, PeerOrchestratorHandle, ReplaceReport,
    TeardownReport,
};
use crate::supervisor::{ChannelState, ConnectionSupervisor, ReconnectPolicy, SupervisorEvent};
use crate::transport::{SignalingTransport, WebSocketTransport};
use common::protocol::{ClientMessage, ServerMessage};
use common::types::{ConnectionId, RoomCode, SessionId, UserId};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Buffer for notices awaiting the application.
const NOTICE_BUFFER: usize = 64;

/// Buffer for signaling frames produced by peer links.
const SIGNAL_BUFFER: usize = 256;

/// Non-blocking, user-visible notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotice {
    /// Local media was downgraded; the call continues.
    MediaWarning(MediaWarning),
    /// A relayed payload could not be applied; that peer's link was removed.
    NegotiationFailed { peer: ConnectionId, reason: String },
    /// A peer link failed and was removed.
    PeerFailed { peer: ConnectionId, reason: String },
    /// One peer kept its previous video track during a swap.
    ScreenShareFailed { peer: ConnectionId, reason: String },
    /// The host closed the room; local state is already torn down.
    RoomEnded { room_code: RoomCode },
    MutedByHost { room_code: RoomCode, muted: bool },
    /// A server error not tied to a pending request.
    ServerError { code: String, message: String },
    /// The signaling channel was re-established.
    Reconnected,
    /// Every reconnect attempt failed.
    SignalingConnectionFailed { attempts: u32 },
}

/// Result of [`RoomClient::join_room`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room_code: RoomCode,
    pub members: Vec<ConnectionId>,
    pub is_host: bool,
    pub session_id: Option<SessionId>,
    /// Peer links open once the join was processed.
    pub peers: usize,
    /// Constraint set that was granted.
    pub constraints: MediaConstraints,
    pub warnings: Vec<MediaWarning>,
}

pub struct RoomClient {
    config: ClientConfig,
    user_id: UserId,
    supervisor: ConnectionSupervisor,
    orchestrator: PeerOrchestratorHandle,
    devices: Arc<dyn MediaDevices>,
    notices: mpsc::Sender<ClientNotice>,
    connection_id: watch::Receiver<Option<ConnectionId>>,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RoomClient {
    /// Build a client and start its background tasks. Must be called inside
    /// a Tokio runtime.
    ///
    /// Returns the client and the receiver for user-visible notices.
    pub fn new(
        config: ClientConfig,
        user_id: UserId,
        transport: Arc<dyn SignalingTransport>,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnector>,
    ) -> (Self, mpsc::Receiver<ClientNotice>) {
        let cancel_token = CancellationToken::new();
        let (notices_tx, notices_rx) = mpsc::channel(NOTICE_BUFFER);
        let (signals_tx, signals_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (connection_id_tx, connection_id_rx) = watch::channel(None);

        let (supervisor, inbound) =
            ConnectionSupervisor::new(transport, ReconnectPolicy::from(&config));
        let (orchestrator, orchestrator_task) = PeerOrchestrator::spawn(
            connector,
            signals_tx,
            notices_tx.clone(),
            cancel_token.child_token(),
        );

        let router = tokio::spawn(route_inbound(
            inbound,
            orchestrator.clone(),
            connection_id_tx,
            cancel_token.clone(),
        ));
        let forwarder = tokio::spawn(forward_signals(
            signals_rx,
            supervisor.clone(),
            cancel_token.clone(),
        ));
        let events = tokio::spawn(watch_supervisor(
            supervisor.subscribe(),
            supervisor.clone(),
            orchestrator.clone(),
            user_id.clone(),
            notices_tx.clone(),
            cancel_token.clone(),
        ));

        let client = Self {
            config,
            user_id,
            supervisor,
            orchestrator,
            devices,
            notices: notices_tx,
            connection_id: connection_id_rx,
            cancel_token,
            tasks: vec![orchestrator_task, router, forwarder, events],
        };

        (client, notices_rx)
    }

    /// Build a client speaking WebSocket to `config.server_url`.
    pub fn with_websocket(
        config: ClientConfig,
        user_id: UserId,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnector>,
    ) -> (Self, mpsc::Receiver<ClientNotice>) {
        let transport = Arc::new(WebSocketTransport::new(config.server_url.clone()));
        Self::new(config, user_id, transport, devices, connector)
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.supervisor.state()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.supervisor.watch_state()
    }

    #[must_use]
    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    /// Connection id assigned by the server on the current channel.
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id.borrow().clone()
    }

    /// Open the signaling channel.
    ///
    /// # Errors
    ///
    /// `ClientError::SignalingConnectionFailed` once retries are exhausted.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.supervisor.connect().await
    }

    /// Acquire local media, join `room_code` and open one peer link per
    /// existing member.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotConnected` without a signaling channel
    /// - `ClientError::AlreadyInRoom` if a room is joined or being joined
    /// - `ClientError::Media` if every media constraint set failed
    /// - `ClientError::Server` if the server rejected the join
    /// - `ClientError::JoinTimeout` if no acknowledgment arrived in time
    pub async fn join_room(&self, room_code: RoomCode) -> Result<JoinOutcome, ClientError> {
        if self.supervisor.state() != ChannelState::Connected {
            return Err(ClientError::NotConnected);
        }
        if let Some(current) = self.orchestrator.status().await?.room_code {
            return Err(ClientError::AlreadyInRoom(current));
        }

        let acquired =
            acquire_local_media(self.devices.as_ref(), &self.config.media_fallback_order).await?;
        for warning in &acquired.warnings {
            self.notify(ClientNotice::MediaWarning(*warning));
        }

        let ack = self
            .orchestrator
            .begin_join(room_code.clone(), acquired.source)
            .await?;

        if let Err(e) = self
            .supervisor
            .send(ClientMessage::JoinRoom {
                room_code: room_code.clone(),
                user_id: self.user_id.clone(),
            })
            .await
        {
            let _ = self.orchestrator.leave().await;
            return Err(e);
        }

        let ack = match tokio::time::timeout(self.config.join_timeout, ack).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(ClientError::Internal(
                    "join acknowledgment dropped".to_string(),
                ))
            }
            Err(_) => {
                warn!(
                    target: "client.room",
                    room_code = %room_code,
                    timeout_ms = u64::try_from(self.config.join_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Join not acknowledged, abandoning"
                );
                let _ = self.orchestrator.leave().await;
                let _ = self
                    .supervisor
                    .send(ClientMessage::LeaveRoom { room_code })
                    .await;
                return Err(ClientError::JoinTimeout);
            }
        };

        info!(
            target: "client.room",
            room_code = %ack.room_code,
            is_host = ack.is_host,
            peers = ack.peers,
            constraints = %acquired.constraints,
            "Room joined"
        );

        Ok(JoinOutcome {
            room_code: ack.room_code,
            members: ack.members,
            is_host: ack.is_host,
            session_id: ack.session_id,
            peers: ack.peers,
            constraints: acquired.constraints,
            warnings: acquired.warnings,
        })
    }

    /// Leave the current room: tear down every link and stop local media,
    /// then tell the server.
    ///
    /// # Errors
    ///
    /// `ClientError::NotInRoom` when no room is joined.
    pub async fn leave_room(&self) -> Result<TeardownReport, ClientError> {
        let report = self.orchestrator.leave().await?;
        if let Some(room_code) = &report.room_code {
            if let Err(e) = self
                .supervisor
                .send(ClientMessage::LeaveRoom {
                    room_code: room_code.clone(),
                })
                .await
            {
                debug!(
                    target: "client.room",
                    room_code = %room_code,
                    error = %e,
                    "Leave not delivered, server will drop us on disconnect"
                );
            }
        }
        Ok(report)
    }

    /// Ask the server to end the current room for everyone (host only).
    ///
    /// Local teardown happens when the room-ended broadcast arrives.
    ///
    /// # Errors
    ///
    /// `ClientError::NotInRoom` when no room is joined.
    pub async fn close_room(&self) -> Result<(), ClientError> {
        let room_code = self.current_room().await?;
        self.supervisor
            .send(ClientMessage::CloseRoom { room_code })
            .await
    }

    /// Report local media flags for attendance tracking.
    ///
    /// # Errors
    ///
    /// `ClientError::NotInRoom` when no room is joined.
    pub async fn report_media_state(&self, video: bool, audio: bool) -> Result<(), ClientError> {
        let room_code = self.current_room().await?;
        let screen_share = self.orchestrator.status().await?.screen_sharing;
        self.supervisor
            .send(ClientMessage::MediaState {
                room_code,
                video,
                audio,
                screen_share,
            })
            .await
    }

    /// Mute or unmute another participant (host only).
    ///
    /// # Errors
    ///
    /// `ClientError::NotInRoom` when no room is joined.
    pub async fn host_mute(&self, target: UserId, muted: bool) -> Result<(), ClientError> {
        let room_code = self.current_room().await?;
        self.supervisor
            .send(ClientMessage::HostMute {
                room_code,
                target_user_id: target,
                muted,
            })
            .await
    }

    /// Capture the screen and send it instead of the camera to every peer.
    ///
    /// # Errors
    ///
    /// `ClientError::Media` if the display cannot be captured,
    /// `ClientError::NotInRoom` without local media.
    pub async fn start_screen_share(&self) -> Result<ReplaceReport, ClientError> {
        let screen = self
            .devices
            .acquire_display()
            .await
            .map_err(MediaAccessError::from)?;
        self.orchestrator.start_screen_share(screen).await
    }

    /// # Errors
    ///
    /// `ClientError::NotInRoom` without local media.
    pub async fn stop_screen_share(&self) -> Result<ReplaceReport, ClientError> {
        self.orchestrator.stop_screen_share().await
    }

    /// Foreground notification; may trigger one reconnect attempt.
    pub async fn on_visibility_change(&self, visible: bool) -> bool {
        self.supervisor.on_visibility_change(visible).await
    }

    /// # Errors
    ///
    /// Returns `ClientError::Internal` if the orchestrator is gone.
    pub async fn status(&self) -> Result<OrchestratorStatus, ClientError> {
        self.orchestrator.status().await
    }

    /// Leave any room, stop all media, close the channel and stop the
    /// background tasks.
    pub async fn shutdown(self) -> TeardownReport {
        if let Ok(status) = self.orchestrator.status().await {
            if let Some(room_code) = status.room_code {
                let _ = self
                    .supervisor
                    .send(ClientMessage::LeaveRoom { room_code })
                    .await;
            }
        }

        let report = self.orchestrator.shutdown().await.unwrap_or_default();
        self.supervisor.shutdown();
        self.cancel_token.cancel();

        for task in self.tasks {
            let _ = task.await;
        }

        info!(
            target: "client.room",
            links_closed = report.links_closed,
            tracks_stopped = report.tracks_stopped,
            "Client shut down"
        );
        report
    }

    async fn current_room(&self) -> Result<RoomCode, ClientError> {
        self.orchestrator
            .status()
            .await?
            .room_code
            .ok_or(ClientError::NotInRoom)
    }

    fn notify(&self, notice: ClientNotice) {
        if let Err(e) = self.notices.try_send(notice) {
            debug!(target: "client.room", error = %e, "Notice dropped");
        }
    }
}

/// Deliver server frames from the stable inbound queue to the orchestrator.
async fn route_inbound(
    mut inbound: mpsc::Receiver<ServerMessage>,
    orchestrator: PeerOrchestratorHandle,
    connection_id: watch::Sender<Option<ConnectionId>>,
    cancel_token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = cancel_token.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if let ServerMessage::Welcome { connection_id: id } = &message {
            debug!(target: "client.room", connection_id = %id, "Signaling channel assigned id");
            connection_id.send_replace(Some(id.clone()));
            continue;
        }

        if orchestrator.handle_server_message(message).await.is_err() {
            break;
        }
    }
}

/// Send signaling frames produced by peer links on the current channel.
async fn forward_signals(
    mut signals: mpsc::Receiver<ClientMessage>,
    supervisor: ConnectionSupervisor,
    cancel_token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = cancel_token.cancelled() => break,
            message = signals.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        // Links are rebuilt after a reconnect, so a lost payload is
        // renegotiated rather than retried.
        if let Err(e) = supervisor.send(message).await {
            debug!(target: "client.room", error = %e, "Signal not sent");
        }
    }
}

/// React to supervisor events: surface failures, re-join after reconnects.
async fn watch_supervisor(
    mut events: broadcast::Receiver<SupervisorEvent>,
    supervisor: ConnectionSupervisor,
    orchestrator: PeerOrchestratorHandle,
    user_id: UserId,
    notices: mpsc::Sender<ClientNotice>,
    cancel_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel_token.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(SupervisorEvent::Reconnected) => {
                let _ = notices.try_send(ClientNotice::Reconnected);
                match orchestrator.resume().await {
                    Ok(Some(room_code)) => {
                        if let Err(e) = supervisor
                            .send(ClientMessage::JoinRoom {
                                room_code: room_code.clone(),
                                user_id: user_id.clone(),
                            })
                            .await
                        {
                            warn!(
                                target: "client.room",
                                room_code = %room_code,
                                error = %e,
                                "Re-join after reconnect not sent"
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(_) => break,
                }
            }
            Ok(SupervisorEvent::SignalingConnectionFailed { attempts }) => {
                let _ = notices.try_send(ClientNotice::SignalingConnectionFailed { attempts });
            }
            Ok(SupervisorEvent::StateChanged(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "client.room", skipped, "Supervisor events lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
