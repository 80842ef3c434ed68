//! `RoomRegistryActor` - singleton mapping room codes to live room actors.
//!
//! The registry only serialises the creation and removal of room entries;
//! membership changes run inside each `RoomActor`. It owns the root
//! `CancellationToken`: room and connection actors receive child tokens.
//!
//! Each room entry carries a generation number. A vacancy report removes an
//! entry only if the generations match, so a late report from a vacated room
//! never removes its replacement.

use crate::errors::RcError;

use super::connection::{ConnectionActor, ConnectionActorHandle};
use super::messages::{
    JoinResult, LeaveOutcome, LeaveReason, RegistryMessage, RegistryStatus, RoomState,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};

use common::protocol::ServerMessage;
use common::types::{ConnectionId, RoomCode, UserId};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Joins retried against a fresh room entry when they race with vacancy.
const JOIN_ATTEMPTS: usize = 3;

/// How long shutdown waits for each room actor to finish.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `RoomRegistryActor`.
#[derive(Clone, Debug)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl RoomRegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(instance_id: String, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor {
            instance_id: instance_id.clone(),
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            next_generation: 1,
            accepting_new: true,
            metrics: Arc::clone(&metrics),
            mailbox: MailboxMonitor::new(ActorType::Registry, instance_id),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            metrics,
        }
    }

    /// Spawn a `ConnectionActor` under the registry's cancellation tree.
    #[must_use]
    pub fn spawn_connection(
        &self,
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        ConnectionActor::spawn(
            connection_id,
            outbound,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        )
    }

    /// Join `connection` to `room_code`, creating the room if needed.
    ///
    /// # Errors
    ///
    /// `RcError::Draining` during shutdown, `RcError::RoomClosing` if every
    /// attempt raced with a vacating room.
    pub async fn join(
        &self,
        room_code: &RoomCode,
        user_id: &UserId,
        connection: &ConnectionActorHandle,
    ) -> Result<JoinResult, RcError> {
        for attempt in 1..=JOIN_ATTEMPTS {
            let room = self.get_or_create_room(room_code.clone()).await?;
            match room.join(user_id.clone(), connection.clone()).await {
                Err(RcError::RoomClosing) => {
                    debug!(
                        target: "rc.actor.registry",
                        room_code = %room_code,
                        attempt,
                        "Join raced with vacating room, retrying"
                    );
                }
                other => return other,
            }
        }
        Err(RcError::RoomClosing)
    }

    /// Remove a connection from one room.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` if the registry is gone.
    pub async fn leave(
        &self,
        room_code: &RoomCode,
        connection_id: &ConnectionId,
    ) -> Result<LeaveOutcome, RcError> {
        match self.get_room(room_code.clone()).await? {
            Some(room) => Ok(room.leave(connection_id.clone(), LeaveReason::Leave).await),
            None => Ok(LeaveOutcome::NotMember),
        }
    }

    /// Remove a disconnected connection from every room it is in.
    ///
    /// Returns the rooms it was removed from, with the outcome in each.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` if the registry is gone.
    pub async fn disconnect(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Vec<(RoomCode, LeaveOutcome)>, RcError> {
        let rooms = self.list_rooms().await?;
        let removals = rooms.iter().map(|room| async move {
            let outcome = room
                .leave(connection_id.clone(), LeaveReason::Disconnect)
                .await;
            outcome
                .removed()
                .then(|| (room.room_code().clone(), outcome))
        });

        let left: Vec<(RoomCode, LeaveOutcome)> =
            join_all(removals).await.into_iter().flatten().collect();

        debug!(
            target: "rc.actor.registry",
            connection_id = %connection_id,
            rooms_left = left.len(),
            "Disconnect scan complete"
        );
        Ok(left)
    }

    /// Broadcast `room_ended` to every member and drop the room.
    ///
    /// Returns the connections that were members.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` if the registry is gone.
    pub async fn close_room(&self, room_code: &RoomCode) -> Result<Vec<ConnectionId>, RcError> {
        match self.get_room(room_code.clone()).await? {
            Some(room) => Ok(room.close().await),
            None => Ok(Vec::new()),
        }
    }

    /// Members of a room in join order; empty if the room is not live.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` if the registry is gone.
    pub async fn members(&self, room_code: &RoomCode) -> Result<Vec<ConnectionId>, RcError> {
        Ok(self
            .room_state(room_code)
            .await?
            .map(|state| state.members)
            .unwrap_or_default())
    }

    /// Current host connection of a room.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` if the registry is gone.
    pub async fn host(&self, room_code: &RoomCode) -> Result<Option<ConnectionId>, RcError> {
        Ok(self
            .room_state(room_code)
            .await?
            .and_then(|state| state.host))
    }

    /// Snapshot of a live room.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` if the registry is gone.
    pub async fn room_state(&self, room_code: &RoomCode) -> Result<Option<RoomState>, RcError> {
        match self.get_room(room_code.clone()).await? {
            // A room that exits between lookup and query is treated as absent.
            Some(room) => Ok(room.get_state().await.ok()),
            None => Ok(None),
        }
    }

    /// Deliver `message` to every connection of `user_id` in a room.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` if the registry is gone.
    pub async fn send_to_user(
        &self,
        room_code: &RoomCode,
        user_id: &UserId,
        message: ServerMessage,
    ) -> Result<usize, RcError> {
        match self.get_room(room_code.clone()).await? {
            Some(room) => Ok(room.send_to_user(user_id.clone(), message).await),
            None => Ok(0),
        }
    }

    async fn get_or_create_room(&self, room_code: RoomCode) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetOrCreateRoom {
                room_code,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    async fn get_room(&self, room_code: RoomCode) -> Result<Option<RoomActorHandle>, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetRoom {
                room_code,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    async fn list_rooms(&self) -> Result<Vec<RoomActorHandle>, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::ListRooms { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the current registry status.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` if the registry is gone.
    pub async fn get_status(&self) -> Result<RegistryStatus, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting rooms and cancel every actor.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` if the registry is gone.
    pub async fn shutdown(&self) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor tree (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning child actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    instance_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Handed to room actors for vacancy reports.
    self_sender: mpsc::Sender<RegistryMessage>,
    /// Root token.
    cancel_token: CancellationToken,
    rooms: HashMap<RoomCode, ManagedRoom>,
    next_generation: u64,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    #[instrument(skip_all, name = "rc.actor.registry", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.registry",
            instance_id = %self.instance_id,
            "RoomRegistryActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.registry",
                        instance_id = %self.instance_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rc.actor.registry",
                                instance_id = %self.instance_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.registry",
            instance_id = %self.instance_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::GetOrCreateRoom {
                room_code,
                respond_to,
            } => {
                let result = self.get_or_create_room(room_code);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoom {
                room_code,
                respond_to,
            } => {
                let room = self
                    .rooms
                    .get(&room_code)
                    .map(|managed| managed.handle.clone());
                let _ = respond_to.send(room);
            }

            RegistryMessage::ListRooms { respond_to } => {
                let rooms = self
                    .rooms
                    .values()
                    .map(|managed| managed.handle.clone())
                    .collect();
                let _ = respond_to.send(rooms);
            }

            RegistryMessage::RoomVacated {
                room_code,
                generation,
            } => {
                self.remove_room(&room_code, generation);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown { respond_to } => {
                info!(
                    target: "rc.actor.registry",
                    instance_id = %self.instance_id,
                    room_count = self.rooms.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn get_or_create_room(&mut self, room_code: RoomCode) -> Result<RoomActorHandle, RcError> {
        if let Some(managed) = self.rooms.get(&room_code) {
            if !managed.handle.is_closing() {
                return Ok(managed.handle.clone());
            }
        }

        if !self.accepting_new {
            return Err(RcError::Draining);
        }

        // A vacating entry is replaced; its late vacancy report is ignored by
        // the generation check.
        if let Some(old) = self.rooms.remove(&room_code) {
            old.handle.cancel();
            self.metrics.room_removed();
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let (handle, task_handle) = RoomActor::spawn(
            room_code.clone(),
            generation,
            self.self_sender.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_code.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.room_created();

        debug!(
            target: "rc.actor.registry",
            instance_id = %self.instance_id,
            room_code = %room_code,
            generation,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    fn remove_room(&mut self, room_code: &RoomCode, generation: u64) {
        let matches = self
            .rooms
            .get(room_code)
            .is_some_and(|managed| managed.handle.generation() == generation);
        if !matches {
            return;
        }

        if let Some(managed) = self.rooms.remove(room_code) {
            managed.handle.cancel();
            self.metrics.room_removed();

            debug!(
                target: "rc.actor.registry",
                instance_id = %self.instance_id,
                room_code = %room_code,
                generation,
                total_rooms = self.rooms.len(),
                "Empty room removed"
            );
        }
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for (room_code, managed) in self.rooms.drain() {
            managed.handle.cancel();
            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.registry",
                        room_code = %room_code,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.registry",
                        room_code = %room_code,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(
            target: "rc.actor.registry",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop entries whose actor task ended without a vacancy report.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomCode> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(code, _)| code.clone())
            .collect();

        for room_code in finished {
            if let Some(managed) = self.rooms.remove(&room_code) {
                if let Err(join_error) = managed.task_handle.await {
                    if join_error.is_panic() {
                        error!(
                            target: "rc.actor.registry",
                            instance_id = %self.instance_id,
                            room_code = %room_code,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
                self.metrics.room_removed();
            }
        }
    }
}
