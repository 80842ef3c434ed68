//! `RoomActor` - one per live room.
//!
//! Owns the member set, join order and host slot of a single room. Every
//! membership mutation for the room goes through this actor's mailbox, so two
//! joins racing for the same room are applied one after the other while
//! other rooms proceed independently.
//!
//! # Host slot
//!
//! The first connection to join takes the host slot. If the host leaves, the
//! slot is cleared and stays vacant for the rest of this actor's lifetime; it
//! is never handed to a later joiner.
//!
//! # Vacancy
//!
//! When the member set becomes empty the actor marks itself closing, refuses
//! further joins with `RcError::RoomClosing` and reports `RoomVacated` to the
//! registry, which drops the entry and cancels the actor.

use crate::errors::RcError;
use crate::observability::metrics as prom;

use super::connection::ConnectionActorHandle;
use super::messages::{
    JoinResult, LeaveOutcome, LeaveReason, RegistryMessage, RoomMessage, RoomState,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::protocol::ServerMessage;
use common::types::{ConnectionId, RoomCode, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_code: RoomCode,
    generation: u64,
    closing: Arc<AtomicBool>,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    /// Registry generation of this room entry.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the room has emptied and refuses joins.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || self.sender.is_closed()
    }

    /// Add a connection to the room.
    ///
    /// # Errors
    ///
    /// `RcError::RoomClosing` if the room is vacating or its actor is gone.
    pub async fn join(
        &self,
        user_id: UserId,
        connection: ConnectionActorHandle,
    ) -> Result<JoinResult, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                user_id,
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| RcError::RoomClosing)?;

        rx.await.map_err(|_| RcError::RoomClosing)?
    }

    /// Remove a connection.
    ///
    /// A room whose actor already exited has no members.
    pub async fn leave(&self, connection_id: ConnectionId, reason: LeaveReason) -> LeaveOutcome {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RoomMessage::Leave {
                connection_id,
                reason,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return LeaveOutcome::NotMember;
        }
        rx.await.unwrap_or(LeaveOutcome::NotMember)
    }

    /// Broadcast `room_ended` and remove every member.
    ///
    /// Returns the connections that were members.
    pub async fn close(&self) -> Vec<ConnectionId> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RoomMessage::Close { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Deliver `message` to every connection joined as `user_id`.
    ///
    /// Returns the number of connections reached.
    pub async fn send_to_user(&self, user_id: UserId, message: ServerMessage) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RoomMessage::SendToUser {
                user_id,
                message,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Snapshot of the room.
    ///
    /// # Errors
    ///
    /// `RcError::Internal` if the actor is gone.
    pub async fn get_state(&self) -> Result<RoomState, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A joined connection.
#[derive(Debug)]
struct Member {
    user_id: UserId,
    connection: ConnectionActorHandle,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_code: RoomCode,
    generation: u64,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    /// Registry mailbox for vacancy reports.
    registry: mpsc::Sender<RegistryMessage>,
    /// Members in join order.
    members: Vec<Member>,
    host: Option<ConnectionId>,
    /// Set once the host slot has been assigned; never reset.
    host_assigned: bool,
    closing: Arc<AtomicBool>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_code: RoomCode,
        generation: u64,
        registry: mpsc::Sender<RegistryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let closing = Arc::new(AtomicBool::new(false));

        let actor = Self {
            room_code: room_code.clone(),
            generation,
            receiver,
            cancel_token: cancel_token.clone(),
            registry,
            members: Vec::new(),
            host: None,
            host_assigned: false,
            closing: Arc::clone(&closing),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_code.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_code,
            generation,
            closing,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "rc.actor.room",
        fields(room_code = %self.room_code, generation = self.generation)
    )]
    async fn run(mut self) {
        debug!(
            target: "rc.actor.room",
            room_code = %self.room_code,
            generation = self.generation,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.room",
                        room_code = %self.room_code,
                        "RoomActor received cancellation signal"
                    );
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
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "rc.actor.room",
            room_code = %self.room_code,
            generation = self.generation,
            members_remaining = self.members.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                user_id,
                connection,
                respond_to,
            } => {
                let result = self.handle_join(user_id, connection);
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave {
                connection_id,
                reason,
                respond_to,
            } => {
                let outcome = self.handle_leave(&connection_id, reason).await;
                let _ = respond_to.send(outcome);
            }

            RoomMessage::Close { respond_to } => {
                let removed = self.handle_close().await;
                let _ = respond_to.send(removed);
            }

            RoomMessage::SendToUser {
                user_id,
                message,
                respond_to,
            } => {
                let reached = self.handle_send_to_user(&user_id, &message);
                let _ = respond_to.send(reached);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }
        }
    }

    fn handle_join(
        &mut self,
        user_id: UserId,
        connection: ConnectionActorHandle,
    ) -> Result<JoinResult, RcError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(RcError::RoomClosing);
        }

        let connection_id = connection.connection_id().clone();

        // Repeated join from a current member: no duplicate entry, no broadcast.
        if let Some(pos) = self
            .members
            .iter()
            .position(|m| m.connection.connection_id() == &connection_id)
        {
            let existing_members = self
                .members
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != pos)
                .map(|(_, m)| m.connection.connection_id().clone())
                .collect();
            return Ok(JoinResult {
                existing_members,
                is_host: self.host.as_ref() == Some(&connection_id),
                newly_joined: false,
            });
        }

        let existing_members: Vec<ConnectionId> = self
            .members
            .iter()
            .map(|m| m.connection.connection_id().clone())
            .collect();

        let is_host = if self.host_assigned {
            false
        } else {
            self.host = Some(connection_id.clone());
            self.host_assigned = true;
            true
        };

        self.broadcast(&ServerMessage::MemberJoined {
            room_code: self.room_code.clone(),
            connection_id: connection_id.clone(),
        });

        self.members.push(Member {
            user_id,
            connection,
        });
        prom::record_join();

        debug!(
            target: "rc.actor.room",
            room_code = %self.room_code,
            connection_id = %connection_id,
            is_host,
            member_count = self.members.len(),
            "Connection joined room"
        );

        Ok(JoinResult {
            existing_members,
            is_host,
            newly_joined: true,
        })
    }

    async fn handle_leave(
        &mut self,
        connection_id: &ConnectionId,
        reason: LeaveReason,
    ) -> LeaveOutcome {
        let Some(pos) = self
            .members
            .iter()
            .position(|m| m.connection.connection_id() == connection_id)
        else {
            return LeaveOutcome::NotMember;
        };

        let leaving = self.members.remove(pos);
        let user_still_present = self.members.iter().any(|m| m.user_id == leaving.user_id);
        if self.host.as_ref() == Some(connection_id) {
            self.host = None;
            debug!(
                target: "rc.actor.room",
                room_code = %self.room_code,
                connection_id = %connection_id,
                "Host left, host slot cleared"
            );
        }
        prom::record_leave(reason.as_str());

        self.broadcast(&ServerMessage::MemberLeft {
            room_code: self.room_code.clone(),
            connection_id: connection_id.clone(),
        });

        debug!(
            target: "rc.actor.room",
            room_code = %self.room_code,
            connection_id = %connection_id,
            reason = reason.as_str(),
            user_still_present,
            member_count = self.members.len(),
            "Connection left room"
        );

        if self.members.is_empty() {
            self.vacate().await;
        }

        if user_still_present {
            LeaveOutcome::UserStillPresent
        } else {
            LeaveOutcome::Departed
        }
    }

    async fn handle_close(&mut self) -> Vec<ConnectionId> {
        self.broadcast(&ServerMessage::RoomEnded {
            room_code: self.room_code.clone(),
        });

        let removed: Vec<ConnectionId> = self
            .members
            .drain(..)
            .map(|m| m.connection.connection_id().clone())
            .collect();
        self.host = None;
        for _ in &removed {
            prom::record_leave("close");
        }

        info!(
            target: "rc.actor.room",
            room_code = %self.room_code,
            members_removed = removed.len(),
            "Room closed by host"
        );

        self.vacate().await;
        removed
    }

    fn handle_send_to_user(&self, user_id: &UserId, message: &ServerMessage) -> usize {
        let mut reached = 0;
        for member in self.members.iter().filter(|m| &m.user_id == user_id) {
            if self.deliver(member, message.clone()) {
                reached += 1;
            }
        }
        reached
    }

    fn state(&self) -> RoomState {
        RoomState {
            room_code: self.room_code.clone(),
            generation: self.generation,
            members: self
                .members
                .iter()
                .map(|m| m.connection.connection_id().clone())
                .collect(),
            host: self.host.clone(),
            is_closing: self.closing.load(Ordering::SeqCst),
        }
    }

    /// Send `message` to every member.
    fn broadcast(&self, message: &ServerMessage) {
        for member in &self.members {
            self.deliver(member, message.clone());
        }
    }

    fn deliver(&self, member: &Member, message: ServerMessage) -> bool {
        match member.connection.deliver(message) {
            Ok(()) => true,
            Err(e) => {
                self.mailbox.record_drop();
                debug!(
                    target: "rc.actor.room",
                    room_code = %self.room_code,
                    connection_id = %member.connection.connection_id(),
                    error = %e,
                    "Failed to deliver room event"
                );
                false
            }
        }
    }

    /// Refuse further joins and report the empty room to the registry.
    async fn vacate(&mut self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self
            .registry
            .send(RegistryMessage::RoomVacated {
                room_code: self.room_code.clone(),
                generation: self.generation,
            })
            .await
        {
            warn!(
                target: "rc.actor.room",
                room_code = %self.room_code,
                error = %e,
                "Failed to report vacancy to registry"
            );
        }
    }
}
