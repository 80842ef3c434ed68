//! Signal relay: forwards opaque negotiation payloads between two
//! connections.
//!
//! The relay never validates that sender and target share a room; the client
//! supplies the target. A target that is unknown or already gone is dropped
//! silently, counted in `rc_signals_dropped_total`, and never reported back
//! to the sender.

use crate::actors::ConnectionActorHandle;
use crate::observability::metrics;
use common::protocol::{ServerMessage, SignalPayload};
use common::types::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Live signaling channels by connection id.
#[derive(Debug, Default)]
pub struct ConnectionDirectory {
    connections: RwLock<HashMap<ConnectionId, ConnectionActorHandle>>,
}

impl ConnectionDirectory {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, handle: ConnectionActorHandle) {
        self.connections
            .write()
            .await
            .insert(handle.connection_id().clone(), handle);
    }

    pub async fn unregister(&self, connection_id: &ConnectionId) {
        self.connections.write().await.remove(connection_id);
    }

    pub async fn get(&self, connection_id: &ConnectionId) -> Option<ConnectionActorHandle> {
        self.connections.read().await.get(connection_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

/// Relay between connections in the directory.
#[derive(Debug, Clone)]
pub struct SignalRelay {
    directory: Arc<ConnectionDirectory>,
}

impl SignalRelay {
    #[must_use]
    pub fn new(directory: Arc<ConnectionDirectory>) -> Self {
        Self { directory }
    }

    /// Forward `payload` from `from` to `to`.
    ///
    /// Returns `true` if the payload was queued for the target.
    pub async fn relay(&self, from: &ConnectionId, to: &ConnectionId, payload: SignalPayload) -> bool {
        let Some(target) = self.directory.get(to).await else {
            debug!(
                target: "rc.relay",
                from = %from,
                to = %to,
                "Relay target not connected, dropping signal"
            );
            metrics::record_signal_dropped();
            return false;
        };

        match target.deliver(ServerMessage::Signal {
            from: from.clone(),
            payload,
        }) {
            Ok(()) => {
                metrics::record_signal_relayed();
                true
            }
            Err(e) => {
                debug!(
                    target: "rc.relay",
                    from = %from,
                    to = %to,
                    error = %e,
                    "Relay target unreachable, dropping signal"
                );
                metrics::record_signal_dropped();
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, ConnectionActor};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_relay_delivers_to_exactly_one_target() {
        let directory = ConnectionDirectory::new();
        let relay = SignalRelay::new(Arc::clone(&directory));
        let metrics = ActorMetrics::new();
        let token = CancellationToken::new();

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let (a, _) = ConnectionActor::spawn(
            ConnectionId::from("a"),
            tx_a,
            token.child_token(),
            Arc::clone(&metrics),
        );
        let (b, _) = ConnectionActor::spawn(
            ConnectionId::from("b"),
            tx_b,
            token.child_token(),
            Arc::clone(&metrics),
        );
        directory.register(a).await;
        directory.register(b).await;

        let delivered = relay
            .relay(
                &ConnectionId::from("a"),
                &ConnectionId::from("b"),
                SignalPayload::new("offer"),
            )
            .await;
        assert!(delivered);

        let received = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            received,
            ServerMessage::Signal {
                from: ConnectionId::from("a"),
                payload: SignalPayload::new("offer"),
            }
        );
        assert!(rx_a.try_recv().is_err());

        token.cancel();
    }

    #[tokio::test]
    async fn test_relay_to_unknown_target_is_dropped() {
        let relay = SignalRelay::new(ConnectionDirectory::new());
        let delivered = relay
            .relay(
                &ConnectionId::from("a"),
                &ConnectionId::from("ghost"),
                SignalPayload::new("candidate"),
            )
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_relay_to_closed_target_is_dropped() {
        let directory = ConnectionDirectory::new();
        let relay = SignalRelay::new(Arc::clone(&directory));

        let (tx, rx) = mpsc::channel(8);
        let (b, task) = ConnectionActor::spawn(
            ConnectionId::from("b"),
            tx,
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        directory.register(b.clone()).await;
        drop(rx);
        b.cancel();
        task.await.unwrap();

        let delivered = relay
            .relay(
                &ConnectionId::from("a"),
                &ConnectionId::from("b"),
                SignalPayload::new("answer"),
            )
            .await;
        assert!(!delivered);

        directory.unregister(b.connection_id()).await;
        assert!(directory.is_empty().await);
    }
}
