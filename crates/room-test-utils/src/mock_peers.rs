//! Mock peer connector standing in for the media transport.
//!
//! Every created connection is recorded. An `Initiator` connection emits an
//! `offer:<peer>` payload on creation, and a connection that receives an
//! `offer:*` payload answers with `answer:<peer>`, so two mock clients wired
//! through a real server complete a visible negotiation.
//!
//! ```rust,ignore
//! let connector = MockPeerConnector::builder()
//!     .fail_replace_for("c3")
//!     .fail_close_for("c2")
//!     .build();
//! ```

use async_trait::async_trait;
use common::protocol::SignalPayload;
use common::types::ConnectionId;
use room_client::errors::PeerError;
use room_client::media::{MediaTrack, TrackKind};
use room_client::peers::{PeerConnection, PeerConnector, PeerEventKind, PeerEventSink, PeerRole};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// What happened to one mock connection.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer: ConnectionId,
    pub role: PeerRole,
    pub link_id: u64,
    /// Ids of the tracks the connection was created with.
    pub initial_tracks: Vec<String>,
    pub applied: Vec<SignalPayload>,
    /// Video track ids swapped in, `None` for removal.
    pub replaced_video: Vec<Option<String>>,
    pub closed: bool,
    sink: PeerEventSink,
}

#[derive(Debug, Default)]
struct Failures {
    connect: HashSet<String>,
    apply: HashSet<String>,
    replace: HashSet<String>,
    close: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockPeerConnector {
    records: Arc<Mutex<Vec<PeerRecord>>>,
    failures: Arc<Failures>,
}

impl MockPeerConnector {
    #[must_use]
    pub fn builder() -> MockPeerConnectorBuilder {
        MockPeerConnectorBuilder::default()
    }

    /// Every operation succeeds.
    #[must_use]
    pub fn working() -> Self {
        Self::default()
    }

    /// Every connection ever created, in creation order.
    pub fn records(&self) -> Vec<PeerRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Most recent connection to `peer`.
    pub fn record_for(&self, peer: &str) -> Option<PeerRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|record| record.peer.as_str() == peer)
            .cloned()
    }

    /// Connections not yet closed.
    pub fn open_count(&self) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| !record.closed)
            .count()
    }

    /// Emit an event on the most recent connection to `peer`, as the media
    /// stack would.
    pub fn emit(&self, peer: &str, kind: PeerEventKind) {
        let sink = self
            .record_for(peer)
            .map(|record| record.sink)
            .expect("no connection to peer");
        sink.emit(kind);
    }
}

#[async_trait]
impl PeerConnector for MockPeerConnector {
    async fn connect(
        &self,
        peer: &ConnectionId,
        role: PeerRole,
        tracks: &[MediaTrack],
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>, PeerError> {
        if self.failures.connect.contains(peer.as_str()) {
            return Err(PeerError::Connect(format!("mock refused {peer}")));
        }

        let index = {
            let mut records = self.records.lock().unwrap();
            records.push(PeerRecord {
                peer: peer.clone(),
                role,
                link_id: events.link_id(),
                initial_tracks: tracks.iter().map(|t| t.id().to_string()).collect(),
                applied: Vec::new(),
                replaced_video: Vec::new(),
                closed: false,
                sink: events.clone(),
            });
            records.len() - 1
        };

        if role == PeerRole::Initiator {
            events.emit(PeerEventKind::LocalSignal(SignalPayload::new(format!(
                "offer:{peer}"
            ))));
        }

        Ok(Box::new(MockPeerConnection {
            peer: peer.clone(),
            index,
            records: Arc::clone(&self.records),
            failures: Arc::clone(&self.failures),
            events,
        }))
    }
}

struct MockPeerConnection {
    peer: ConnectionId,
    index: usize,
    records: Arc<Mutex<Vec<PeerRecord>>>,
    failures: Arc<Failures>,
    events: PeerEventSink,
}

impl MockPeerConnection {
    fn update(&self, f: impl FnOnce(&mut PeerRecord)) {
        let mut records = self.records.lock().unwrap();
        f(&mut records[self.index]);
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn apply_remote(&mut self, payload: &SignalPayload) -> Result<(), PeerError> {
        if self.failures.apply.contains(self.peer.as_str()) {
            return Err(PeerError::Negotiation("mock rejected payload".to_string()));
        }
        self.update(|record| record.applied.push(payload.clone()));

        if payload.as_str().starts_with("offer:") {
            self.events
                .emit(PeerEventKind::LocalSignal(SignalPayload::new(format!(
                    "answer:{}",
                    self.peer
                ))));
        }
        Ok(())
    }

    async fn replace_track(
        &mut self,
        kind: TrackKind,
        track: Option<&MediaTrack>,
    ) -> Result<(), PeerError> {
        if self.failures.replace.contains(self.peer.as_str()) {
            return Err(PeerError::Track("mock sender gone".to_string()));
        }
        if kind == TrackKind::Video {
            let id = track.map(|t| t.id().to_string());
            self.update(|record| record.replaced_video.push(id));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PeerError> {
        // Closed either way; the failure only reports a dirty release.
        self.update(|record| record.closed = true);
        if self.failures.close.contains(self.peer.as_str()) {
            return Err(PeerError::Connect("mock close failed".to_string()));
        }
        Ok(())
    }
}

/// Builder for `MockPeerConnector`.
#[derive(Debug, Default)]
pub struct MockPeerConnectorBuilder {
    failures: Failures,
}

impl MockPeerConnectorBuilder {
    #[must_use]
    pub fn fail_connect_for(mut self, peer: &str) -> Self {
        self.failures.connect.insert(peer.to_string());
        self
    }

    #[must_use]
    pub fn fail_apply_for(mut self, peer: &str) -> Self {
        self.failures.apply.insert(peer.to_string());
        self
    }

    #[must_use]
    pub fn fail_replace_for(mut self, peer: &str) -> Self {
        self.failures.replace.insert(peer.to_string());
        self
    }

    #[must_use]
    pub fn fail_close_for(mut self, peer: &str) -> Self {
        self.failures.close.insert(peer.to_string());
        self
    }

    #[must_use]
    pub fn build(self) -> MockPeerConnector {
        MockPeerConnector {
            records: Arc::default(),
            failures: Arc::new(self.failures),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use room_client::peers::PeerEvent;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_initiator_emits_offer_and_responder_answers() {
        let connector = MockPeerConnector::working();
        let (tx, mut rx) = mpsc::channel::<PeerEvent>(8);

        let _initiator = connector
            .connect(
                &ConnectionId::from("c1"),
                PeerRole::Initiator,
                &[],
                PeerEventSink::new(1, ConnectionId::from("c1"), tx.clone()),
            )
            .await
            .unwrap();
        let offer = rx.recv().await.unwrap();
        assert_eq!(
            offer.kind,
            PeerEventKind::LocalSignal(SignalPayload::new("offer:c1"))
        );

        let mut responder = connector
            .connect(
                &ConnectionId::from("c2"),
                PeerRole::Responder,
                &[],
                PeerEventSink::new(2, ConnectionId::from("c2"), tx),
            )
            .await
            .unwrap();
        responder
            .apply_remote(&SignalPayload::new("offer:x"))
            .await
            .unwrap();
        let answer = rx.recv().await.unwrap();
        assert_eq!(answer.link_id, 2);
        assert_eq!(connector.record_for("c2").unwrap().applied.len(), 1);
    }
}
