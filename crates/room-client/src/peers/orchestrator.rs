//! `PeerOrchestrator` - owns every peer link of this client.
//!
//! # Lifecycle
//!
//! 1. `begin_join` hands over the acquired local media and moves to
//!    `Joining`; events for the room are buffered from here on
//! 2. The server's `joined` frame creates one `Initiator` link per existing
//!    member, resolves the join, then replays buffered events
//! 3. `member_joined` creates a `Responder` link; `member_left` destroys one
//! 4. `leave`, `room_ended` and `shutdown` tear everything down: every link
//!    is closed (one failure does not stop the rest), every local track is
//!    stopped, and events still in flight for old links are ignored
//!
//! Only this actor mutates the local media source. Links receive track
//! clones when they are created and track swaps through `replace_track`.

use super::link::{
    PeerConnector, PeerEvent, PeerEventKind, PeerEventSink, PeerLink, PeerLinkState, PeerRole,
};
use crate::client::ClientNotice;
use crate::errors::ClientError;
use crate::media::{LocalMediaSource, MediaTrack, TrackKind};
use common::protocol::{ClientMessage, ServerMessage, SignalPayload};
use common::types::{ConnectionId, RoomCode, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the orchestrator mailbox.
const ORCHESTRATOR_CHANNEL_BUFFER: usize = 256;

/// Buffer for events reported by the media transport.
const PEER_EVENT_BUFFER: usize = 256;

/// Result of a join, delivered once the server acknowledged it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAck {
    pub room_code: RoomCode,
    /// Members present before this client; one initiator link each.
    pub members: Vec<ConnectionId>,
    pub is_host: bool,
    pub session_id: Option<SessionId>,
    /// Links open after the acknowledgment was processed.
    pub peers: usize,
}

/// Outcome of a track swap across all links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceReport {
    pub replaced: usize,
    pub failed: Vec<ConnectionId>,
}

/// Outcome of a teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub room_code: Option<RoomCode>,
    /// Links destroyed, including those whose close reported an error.
    pub links_closed: usize,
    pub close_failures: usize,
    pub tracks_stopped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Idle,
    Joining,
    InRoom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub peer_id: ConnectionId,
    pub role: PeerRole,
    pub state: PeerLinkState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorStatus {
    pub phase: RoomPhase,
    pub room_code: Option<RoomCode>,
    pub is_host: bool,
    pub peers: Vec<PeerSummary>,
    pub screen_sharing: bool,
    /// Local tracks still live.
    pub local_tracks: usize,
}

/// Messages handled by the orchestrator.
#[derive(Debug)]
enum OrchestratorMessage {
    BeginJoin {
        room_code: RoomCode,
        media: LocalMediaSource,
        ack: oneshot::Sender<Result<JoinAck, ClientError>>,
    },
    Server {
        message: ServerMessage,
    },
    StartScreenShare {
        screen: MediaTrack,
        respond_to: oneshot::Sender<Result<ReplaceReport, ClientError>>,
    },
    StopScreenShare {
        respond_to: oneshot::Sender<Result<ReplaceReport, ClientError>>,
    },
    Leave {
        respond_to: oneshot::Sender<Result<TeardownReport, ClientError>>,
    },
    /// Channel re-established: drop the links and re-enter `Joining`.
    Resume {
        respond_to: oneshot::Sender<Option<RoomCode>>,
    },
    GetStatus {
        respond_to: oneshot::Sender<OrchestratorStatus>,
    },
    Shutdown {
        respond_to: oneshot::Sender<TeardownReport>,
    },
}

/// Handle to the `PeerOrchestrator`.
#[derive(Clone, Debug)]
pub struct PeerOrchestratorHandle {
    sender: mpsc::Sender<OrchestratorMessage>,
    cancel_token: CancellationToken,
}

impl PeerOrchestratorHandle {
    async fn send(&self, message: OrchestratorMessage) -> Result<(), ClientError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))
    }

    /// Start joining `room_code` with `media`.
    ///
    /// The returned receiver resolves when the server acknowledges the join,
    /// rejects it, or the join is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Internal` if the actor is gone.
    pub async fn begin_join(
        &self,
        room_code: RoomCode,
        media: LocalMediaSource,
    ) -> Result<oneshot::Receiver<Result<JoinAck, ClientError>>, ClientError> {
        let (ack, ack_rx) = oneshot::channel();
        self.send(OrchestratorMessage::BeginJoin {
            room_code,
            media,
            ack,
        })
        .await?;
        Ok(ack_rx)
    }

    /// Route a server frame.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Internal` if the actor is gone.
    pub async fn handle_server_message(&self, message: ServerMessage) -> Result<(), ClientError> {
        self.send(OrchestratorMessage::Server { message }).await
    }

    /// Send `screen` instead of the camera on every link.
    ///
    /// # Errors
    ///
    /// `ClientError::NotInRoom` without local media; the screen track is
    /// stopped in that case.
    pub async fn start_screen_share(&self, screen: MediaTrack) -> Result<ReplaceReport, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorMessage::StartScreenShare {
            screen,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))?
    }

    /// Restore the camera on every link.
    ///
    /// # Errors
    ///
    /// `ClientError::NotInRoom` without local media.
    pub async fn stop_screen_share(&self) -> Result<ReplaceReport, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorMessage::StopScreenShare { respond_to: tx })
            .await?;
        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))?
    }

    /// Tear down the room.
    ///
    /// # Errors
    ///
    /// `ClientError::NotInRoom` when idle.
    pub async fn leave(&self) -> Result<TeardownReport, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorMessage::Leave { respond_to: tx }).await?;
        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))?
    }

    /// Prepare to re-join after a reconnect. Returns the room to re-join.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Internal` if the actor is gone.
    pub async fn resume(&self) -> Result<Option<RoomCode>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorMessage::Resume { respond_to: tx })
            .await?;
        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))
    }

    /// # Errors
    ///
    /// Returns `ClientError::Internal` if the actor is gone.
    pub async fn status(&self) -> Result<OrchestratorStatus, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorMessage::GetStatus { respond_to: tx })
            .await?;
        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))
    }

    /// Tear down and stop the actor.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Internal` if the actor is gone.
    pub async fn shutdown(&self) -> Result<TeardownReport, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorMessage::Shutdown { respond_to: tx })
            .await?;
        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

enum Phase {
    Idle,
    Joining {
        room_code: RoomCode,
        /// `None` when re-joining after a reconnect.
        ack: Option<oneshot::Sender<Result<JoinAck, ClientError>>>,
        /// Room events received before the acknowledgment.
        pending: Vec<ServerMessage>,
    },
    InRoom {
        room_code: RoomCode,
        is_host: bool,
    },
}

impl Phase {
    fn room_code(&self) -> Option<&RoomCode> {
        match self {
            Phase::Idle => None,
            Phase::Joining { room_code, .. } | Phase::InRoom { room_code, .. } => Some(room_code),
        }
    }

    fn kind(&self) -> RoomPhase {
        match self {
            Phase::Idle => RoomPhase::Idle,
            Phase::Joining { .. } => RoomPhase::Joining,
            Phase::InRoom { .. } => RoomPhase::InRoom,
        }
    }
}

/// The `PeerOrchestrator` implementation.
pub struct PeerOrchestrator {
    receiver: mpsc::Receiver<OrchestratorMessage>,
    cancel_token: CancellationToken,
    connector: Arc<dyn PeerConnector>,
    /// Outgoing signaling frames.
    signals: mpsc::Sender<ClientMessage>,
    notices: mpsc::Sender<ClientNotice>,
    peer_events: mpsc::Receiver<PeerEvent>,
    peer_events_tx: mpsc::Sender<PeerEvent>,
    phase: Phase,
    media: Option<LocalMediaSource>,
    links: HashMap<ConnectionId, PeerLink>,
    next_link_id: u64,
}

impl PeerOrchestrator {
    /// Spawn the orchestrator.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connector: Arc<dyn PeerConnector>,
        signals: mpsc::Sender<ClientMessage>,
        notices: mpsc::Sender<ClientNotice>,
        cancel_token: CancellationToken,
    ) -> (PeerOrchestratorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ORCHESTRATOR_CHANNEL_BUFFER);
        let (peer_events_tx, peer_events) = mpsc::channel(PEER_EVENT_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            connector,
            signals,
            notices,
            peer_events,
            peer_events_tx,
            phase: Phase::Idle,
            media: None,
            links: HashMap::new(),
            next_link_id: 1,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PeerOrchestratorHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "client.actor.peers")]
    async fn run(mut self) {
        debug!(target: "client.peers", "PeerOrchestrator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "client.peers", "PeerOrchestrator received cancellation signal");
                    self.teardown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message).await {
                                break;
                            }
                        }
                        None => {
                            debug!(target: "client.peers", "PeerOrchestrator channel closed, exiting");
                            self.teardown().await;
                            break;
                        }
                    }
                }

                Some(event) = self.peer_events.recv() => {
                    self.handle_peer_event(event).await;
                }
            }
        }

        info!(target: "client.peers", "PeerOrchestrator stopped");
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: OrchestratorMessage) -> bool {
        match message {
            OrchestratorMessage::BeginJoin {
                room_code,
                media,
                ack,
            } => self.begin_join(room_code, media, ack),

            OrchestratorMessage::Server { message } => self.handle_server(message).await,

            OrchestratorMessage::StartScreenShare { screen, respond_to } => {
                let result = self.start_screen_share(screen).await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::StopScreenShare { respond_to } => {
                let result = self.stop_screen_share().await;
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::Leave { respond_to } => {
                let result = if matches!(self.phase, Phase::Idle) {
                    Err(ClientError::NotInRoom)
                } else {
                    Ok(self.teardown().await)
                };
                let _ = respond_to.send(result);
            }

            OrchestratorMessage::Resume { respond_to } => {
                let room_code = self.prepare_resume().await;
                let _ = respond_to.send(room_code);
            }

            OrchestratorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            OrchestratorMessage::Shutdown { respond_to } => {
                let report = self.teardown().await;
                let _ = respond_to.send(report);
                return true;
            }
        }
        false
    }

    fn begin_join(
        &mut self,
        room_code: RoomCode,
        mut media: LocalMediaSource,
        ack: oneshot::Sender<Result<JoinAck, ClientError>>,
    ) {
        if let Some(current) = self.phase.room_code() {
            media.stop_all();
            let _ = ack.send(Err(ClientError::AlreadyInRoom(current.clone())));
            return;
        }

        debug!(target: "client.peers", room_code = %room_code, "Joining room");
        self.media = Some(media);
        self.phase = Phase::Joining {
            room_code,
            ack: Some(ack),
            pending: Vec::new(),
        };
    }

    async fn handle_server(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Joined {
                room_code,
                members,
                is_host,
                session_id,
            } => self.on_joined(room_code, members, is_host, session_id).await,

            ServerMessage::MemberJoined { ref room_code, .. }
            | ServerMessage::MemberLeft { ref room_code, .. } => {
                if self.phase.room_code() != Some(room_code) {
                    debug!(
                        target: "client.peers",
                        room_code = %room_code,
                        "Membership event for another room, ignoring"
                    );
                    return;
                }
                self.buffer_or_apply(message).await;
            }

            ServerMessage::Signal { .. } => {
                if matches!(self.phase, Phase::Idle) {
                    debug!(target: "client.peers", "Signal while not in a room, ignoring");
                    return;
                }
                self.buffer_or_apply(message).await;
            }

            ServerMessage::RoomEnded { room_code } => {
                if self.phase.room_code() != Some(&room_code) {
                    return;
                }
                info!(target: "client.peers", room_code = %room_code, "Room ended by host");
                let report = self.teardown().await;
                debug!(
                    target: "client.peers",
                    links_closed = report.links_closed,
                    tracks_stopped = report.tracks_stopped,
                    "Room ended teardown complete"
                );
                self.notify(ClientNotice::RoomEnded { room_code });
            }

            ServerMessage::MutedByHost { room_code, muted } => {
                self.notify(ClientNotice::MutedByHost { room_code, muted });
            }

            ServerMessage::Error { code, message } => self.on_server_error(code, message).await,

            ServerMessage::Welcome { .. } | ServerMessage::Pong => {}
        }
    }

    async fn buffer_or_apply(&mut self, message: ServerMessage) {
        if let Phase::Joining { pending, .. } = &mut self.phase {
            pending.push(message);
            return;
        }
        self.apply_room_event(message).await;
    }

    /// Apply a membership or signal event while in the room.
    async fn apply_room_event(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::MemberJoined { connection_id, .. } => {
                self.open_link(connection_id, PeerRole::Responder).await;
            }
            ServerMessage::MemberLeft { connection_id, .. } => {
                self.close_link(&connection_id).await;
            }
            ServerMessage::Signal { from, payload } => self.on_remote_signal(&from, &payload).await,
            _ => {}
        }
    }

    async fn on_joined(
        &mut self,
        room_code: RoomCode,
        members: Vec<ConnectionId>,
        is_host: bool,
        session_id: Option<SessionId>,
    ) {
        let (ack, pending) = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Joining {
                room_code: joining,
                ack,
                pending,
            } if joining == room_code => (ack, pending),
            other => {
                self.phase = other;
                debug!(
                    target: "client.peers",
                    room_code = %room_code,
                    "Join acknowledgment for a room not being joined, ignoring"
                );
                return;
            }
        };

        self.phase = Phase::InRoom {
            room_code: room_code.clone(),
            is_host,
        };

        for member in &members {
            self.open_link(member.clone(), PeerRole::Initiator).await;
        }

        info!(
            target: "client.peers",
            room_code = %room_code,
            is_host,
            peers = self.links.len(),
            buffered_events = pending.len(),
            "Joined room"
        );

        if let Some(ack) = ack {
            let _ = ack.send(Ok(JoinAck {
                room_code,
                members,
                is_host,
                session_id,
                peers: self.links.len(),
            }));
        }

        for message in pending {
            self.apply_room_event(message).await;
        }
    }

    async fn on_server_error(&mut self, code: String, message: String) {
        if let Phase::Joining { ack, room_code, .. } = &mut self.phase {
            warn!(
                target: "client.peers",
                room_code = %room_code,
                code = %code,
                "Join rejected by server"
            );
            let ack = ack.take();
            self.teardown().await;
            match ack {
                Some(ack) => {
                    let _ = ack.send(Err(ClientError::Server { code, message }));
                }
                None => self.notify(ClientNotice::ServerError { code, message }),
            }
            return;
        }

        self.notify(ClientNotice::ServerError { code, message });
    }

    async fn open_link(&mut self, peer: ConnectionId, role: PeerRole) {
        if self.links.contains_key(&peer) {
            debug!(target: "client.peers", peer = %peer, "Link already exists, ignoring");
            return;
        }

        let link_id = self.next_link_id;
        self.next_link_id += 1;

        let tracks = self
            .media
            .as_ref()
            .map(LocalMediaSource::tracks)
            .unwrap_or_default();
        let sink = PeerEventSink::new(link_id, peer.clone(), self.peer_events_tx.clone());

        match self.connector.connect(&peer, role, &tracks, sink).await {
            Ok(connection) => {
                debug!(
                    target: "client.peers",
                    peer = %peer,
                    role = role.as_str(),
                    link_id,
                    "Peer link created"
                );
                self.links
                    .insert(peer.clone(), PeerLink::new(link_id, peer, role, connection));
            }
            Err(e) => {
                warn!(
                    target: "client.peers",
                    peer = %peer,
                    role = role.as_str(),
                    error = %e,
                    "Peer link could not be created"
                );
                self.notify(ClientNotice::PeerFailed {
                    peer,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn close_link(&mut self, peer: &ConnectionId) {
        let Some(mut link) = self.links.remove(peer) else {
            return;
        };
        if let Err(e) = link.close().await {
            warn!(target: "client.peers", peer = %peer, error = %e, "Peer link close failed");
        }
        debug!(target: "client.peers", peer = %peer, "Peer link removed");
    }

    async fn on_remote_signal(&mut self, from: &ConnectionId, payload: &SignalPayload) {
        let Some(link) = self.links.get_mut(from) else {
            debug!(target: "client.peers", peer = %from, "Signal from unknown peer, ignoring");
            return;
        };

        if let Err(e) = link.apply_remote(payload).await {
            warn!(
                target: "client.peers",
                peer = %from,
                room_code = ?self.phase.room_code(),
                error = %e,
                "Failed to apply remote negotiation payload, removing link"
            );
            // Only this peer is dropped; the rest of the call continues.
            self.close_link(from).await;
            self.notify(ClientNotice::NegotiationFailed {
                peer: from.clone(),
                reason: e.to_string(),
            });
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        let current = self
            .links
            .get(&event.peer)
            .is_some_and(|link| link.link_id() == event.link_id);
        if !current {
            debug!(
                target: "client.peers",
                peer = %event.peer,
                link_id = event.link_id,
                "Event from a destroyed link, ignoring"
            );
            return;
        }

        match event.kind {
            PeerEventKind::LocalSignal(payload) => {
                let message = ClientMessage::Signal {
                    to: event.peer.clone(),
                    payload,
                };
                if self.signals.send(message).await.is_err() {
                    debug!(target: "client.peers", peer = %event.peer, "Signal output gone");
                }
            }
            PeerEventKind::Connected => {
                if let Some(link) = self.links.get_mut(&event.peer) {
                    link.mark_connected();
                }
                info!(target: "client.peers", peer = %event.peer, "Peer connected");
            }
            PeerEventKind::Failed(reason) => {
                warn!(
                    target: "client.peers",
                    peer = %event.peer,
                    reason = %reason,
                    "Peer connection failed, removing link"
                );
                self.close_link(&event.peer).await;
                self.notify(ClientNotice::PeerFailed {
                    peer: event.peer,
                    reason,
                });
            }
            PeerEventKind::Closed => {
                debug!(target: "client.peers", peer = %event.peer, "Peer closed the connection");
                self.close_link(&event.peer).await;
            }
        }
    }

    async fn start_screen_share(&mut self, screen: MediaTrack) -> Result<ReplaceReport, ClientError> {
        let Some(media) = self.media.as_mut() else {
            screen.stop();
            return Err(ClientError::NotInRoom);
        };
        media.start_screen_share(screen.clone());
        info!(target: "client.peers", track_id = screen.id(), "Screen share started");
        Ok(self.swap_video(Some(&screen)).await)
    }

    async fn stop_screen_share(&mut self) -> Result<ReplaceReport, ClientError> {
        let Some(media) = self.media.as_mut() else {
            return Err(ClientError::NotInRoom);
        };
        if !media.is_screen_sharing() {
            return Ok(ReplaceReport::default());
        }
        let camera = media.stop_screen_share();
        info!(
            target: "client.peers",
            camera_restored = camera.is_some(),
            "Screen share stopped"
        );
        Ok(self.swap_video(camera.as_ref()).await)
    }

    /// Swap the outbound video track on every link. One failing peer does not
    /// stop the others.
    async fn swap_video(&mut self, track: Option<&MediaTrack>) -> ReplaceReport {
        let mut report = ReplaceReport::default();
        let mut failures = Vec::new();

        for (peer, link) in &mut self.links {
            match link.replace_track(TrackKind::Video, track).await {
                Ok(()) => report.replaced += 1,
                Err(e) => {
                    warn!(
                        target: "client.peers",
                        peer = %peer,
                        error = %e,
                        "Track replacement failed for peer"
                    );
                    report.failed.push(peer.clone());
                    failures.push((peer.clone(), e.to_string()));
                }
            }
        }

        for (peer, reason) in failures {
            self.notify(ClientNotice::ScreenShareFailed { peer, reason });
        }
        report
    }

    /// Close every link, stop every local track, return to `Idle`.
    async fn teardown(&mut self) -> TeardownReport {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        let room_code = phase.room_code().cloned();
        if let Phase::Joining { ack: Some(ack), .. } = phase {
            let _ = ack.send(Err(ClientError::JoinCancelled));
        }

        let mut report = TeardownReport {
            room_code,
            ..TeardownReport::default()
        };

        let links: Vec<PeerLink> = self.links.drain().map(|(_, link)| link).collect();
        for mut link in links {
            report.links_closed += 1;
            if let Err(e) = link.close().await {
                report.close_failures += 1;
                warn!(
                    target: "client.peers",
                    peer = %link.peer_id(),
                    error = %e,
                    "Peer link close failed during teardown"
                );
            }
        }

        if let Some(mut media) = self.media.take() {
            report.tracks_stopped = media.stop_all();
        }

        if report.room_code.is_some() {
            info!(
                target: "client.peers",
                room_code = ?report.room_code,
                links_closed = report.links_closed,
                close_failures = report.close_failures,
                tracks_stopped = report.tracks_stopped,
                "Room torn down"
            );
        }
        report
    }

    async fn prepare_resume(&mut self) -> Option<RoomCode> {
        let room_code = self.phase.room_code()?.clone();

        // The server dropped our old connection from the room; the remote
        // peers already tore down their side of every link.
        let links: Vec<PeerLink> = self.links.drain().map(|(_, link)| link).collect();
        let dropped = links.len();
        for mut link in links {
            let _ = link.close().await;
        }

        let ack = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Joining { ack, .. } => ack,
            _ => None,
        };
        self.phase = Phase::Joining {
            room_code: room_code.clone(),
            ack,
            pending: Vec::new(),
        };

        info!(
            target: "client.peers",
            room_code = %room_code,
            links_dropped = dropped,
            "Re-joining room after reconnect"
        );
        Some(room_code)
    }

    fn status(&self) -> OrchestratorStatus {
        let mut peers: Vec<PeerSummary> = self
            .links
            .values()
            .map(|link| PeerSummary {
                peer_id: link.peer_id().clone(),
                role: link.role(),
                state: link.state(),
            })
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        OrchestratorStatus {
            phase: self.phase.kind(),
            room_code: self.phase.room_code().cloned(),
            is_host: matches!(self.phase, Phase::InRoom { is_host: true, .. }),
            peers,
            screen_sharing: self
                .media
                .as_ref()
                .is_some_and(LocalMediaSource::is_screen_sharing),
            local_tracks: self.media.as_ref().map_or(0, |media| {
                media.tracks().iter().filter(|t| !t.is_stopped()).count()
            }),
        }
    }

    fn notify(&self, notice: ClientNotice) {
        if let Err(e) = self.notices.try_send(notice) {
            debug!(target: "client.peers", error = %e, "Notice dropped");
        }
    }
}
