//! `ConnectionActor` - one per live signaling channel.
//!
//! Owns the outbound side of one client: rooms and the signal relay enqueue
//! `ServerMessage`s on its mailbox, and the actor forwards them to the
//! gateway's socket writer. Delivery never blocks the sender; a full mailbox
//! drops the message.
//!
//! # Lifecycle
//!
//! 1. Spawned by the gateway when the WebSocket upgrade completes
//! 2. Runs until the gateway closes it, the writer goes away, or the registry
//!    token is cancelled
//! 3. Dropping the outbound sender on exit ends the socket writer

use crate::errors::RcError;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::protocol::ServerMessage;
use common::types::ConnectionId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Queue a message for the client without waiting.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Internal` if the mailbox is full or the actor is gone.
    pub fn deliver(&self, message: ServerMessage) -> Result<(), RcError> {
        self.sender
            .try_send(ConnectionMessage::Deliver { message })
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Close the client's channel.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Internal` if the actor is gone.
    pub async fn close(&self, reason: impl Into<String>) -> Result<(), RcError> {
        self.sender
            .send(ConnectionMessage::Close {
                reason: reason.into(),
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Whether the actor has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: ConnectionId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Frames for the socket writer.
    outbound: mpsc::Sender<ServerMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor writing to `outbound`.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        metrics.connection_created();

        let actor = Self {
            connection_id: connection_id.clone(),
            receiver,
            outbound,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "rc.actor.connection", fields(connection_id = %self.connection_id))]
    async fn run(mut self) {
        debug!(
            target: "rc.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "rc.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        info!(
            target: "rc.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { message } => {
                if self.outbound.send(message).await.is_err() {
                    debug!(
                        target: "rc.actor.connection",
                        connection_id = %self.connection_id,
                        "Socket writer gone, exiting"
                    );
                    return true;
                }
                false
            }

            ConnectionMessage::Close { reason } => {
                info!(
                    target: "rc.actor.connection",
                    connection_id = %self.connection_id,
                    reason = %reason,
                    "Closing connection"
                );
                true
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::RoomCode;
    use std::time::Duration;

    fn spawn_actor() -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        mpsc::Receiver<ServerMessage>,
        Arc<ActorMetrics>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let metrics = ActorMetrics::new();
        let (handle, task) = ConnectionActor::spawn(
            ConnectionId::from("conn-1"),
            tx,
            CancellationToken::new(),
            Arc::clone(&metrics),
        );
        (handle, task, rx, metrics)
    }

    #[tokio::test]
    async fn test_deliver_reaches_outbound() {
        let (handle, _task, mut rx, metrics) = spawn_actor();
        assert_eq!(metrics.connection_count(), 1);

        let room_code: RoomCode = "AB12CD34EF".parse().unwrap();
        handle
            .deliver(ServerMessage::RoomEnded {
                room_code: room_code.clone(),
            })
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, ServerMessage::RoomEnded { room_code });

        handle.cancel();
    }

    #[tokio::test]
    async fn test_close_ends_outbound_stream() {
        let (handle, task, mut rx, metrics) = spawn_actor();

        handle.close("test").await.unwrap();
        task.await.unwrap();

        assert!(rx.recv().await.is_none());
        assert!(handle.is_closed());
        assert_eq!(metrics.connection_count(), 0);
        assert!(handle.deliver(ServerMessage::Pong).is_err());
    }

    #[tokio::test]
    async fn test_writer_gone_stops_actor() {
        let (handle, task, rx, _metrics) = spawn_actor();
        drop(rx);

        handle.deliver(ServerMessage::Pong).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_cancellation_stops_actor() {
        let (handle, task, _rx, _metrics) = spawn_actor();
        handle.cancel();
        task.await.unwrap();
        assert!(handle.is_cancelled());
    }
}
