//! `PeerLink` - one direct media connection to one remote participant.
//!
//! The connection itself belongs to the external media transport behind
//! [`PeerConnector`]. A link only tracks its lifecycle and routes negotiation
//! payloads; it never touches the local media source on its own.

use crate::errors::PeerError;
use crate::media::{MediaTrack, TrackKind};
use async_trait::async_trait;
use common::protocol::SignalPayload;
use common::types::ConnectionId;
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

/// Which side proposes the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Created from the member list of our own join; we send the offer.
    Initiator,
    /// Created for a member announced after us; we answer.
    Responder,
}

impl PeerRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PeerRole::Initiator => "initiator",
            PeerRole::Responder => "responder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkState {
    New,
    Connected,
    Closed,
}

/// Something the media transport reports about one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEventKind {
    /// A locally generated negotiation payload for the remote peer.
    LocalSignal(SignalPayload),
    Connected,
    /// The connection failed and will not recover.
    Failed(String),
    /// The remote side closed the connection.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub link_id: u64,
    pub peer: ConnectionId,
    pub kind: PeerEventKind,
}

/// Handed to the media transport so it can report events for one link.
///
/// Events carry the link id, so anything emitted after the link was
/// destroyed is ignored by the orchestrator.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    link_id: u64,
    peer: ConnectionId,
    tx: mpsc::Sender<PeerEvent>,
}

impl PeerEventSink {
    #[must_use]
    pub fn new(link_id: u64, peer: ConnectionId, tx: mpsc::Sender<PeerEvent>) -> Self {
        Self { link_id, peer, tx }
    }

    #[must_use]
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    #[must_use]
    pub fn peer(&self) -> &ConnectionId {
        &self.peer
    }

    /// Report an event without waiting. Dropped if the orchestrator is gone
    /// or backed up.
    pub fn emit(&self, kind: PeerEventKind) {
        let event = PeerEvent {
            link_id: self.link_id,
            peer: self.peer.clone(),
            kind,
        };
        if let Err(e) = self.tx.try_send(event) {
            warn!(
                target: "client.peers",
                peer = %self.peer,
                link_id = self.link_id,
                error = %e,
                "Peer event dropped"
            );
        }
    }
}

/// Factory for peer connections (the external media transport).
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a connection to `peer` sending `tracks`.
    ///
    /// An `Initiator` connection is expected to emit its offer through
    /// `events` once created.
    async fn connect(
        &self,
        peer: &ConnectionId,
        role: PeerRole,
        tracks: &[MediaTrack],
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>, PeerError>;
}

/// One live peer connection.
#[async_trait]
pub trait PeerConnection: Send {
    /// Apply a negotiation payload received from the remote peer.
    async fn apply_remote(&mut self, payload: &SignalPayload) -> Result<(), PeerError>;

    /// Swap the outbound track of `kind`. `None` removes it.
    async fn replace_track(
        &mut self,
        kind: TrackKind,
        track: Option<&MediaTrack>,
    ) -> Result<(), PeerError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), PeerError>;
}

pub struct PeerLink {
    link_id: u64,
    peer_id: ConnectionId,
    role: PeerRole,
    state: PeerLinkState,
    connection: Box<dyn PeerConnection>,
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("link_id", &self.link_id)
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PeerLink {
    #[must_use]
    pub fn new(
        link_id: u64,
        peer_id: ConnectionId,
        role: PeerRole,
        connection: Box<dyn PeerConnection>,
    ) -> Self {
        Self {
            link_id,
            peer_id,
            role,
            state: PeerLinkState::New,
            connection,
        }
    }

    #[must_use]
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    #[must_use]
    pub fn peer_id(&self) -> &ConnectionId {
        &self.peer_id
    }

    #[must_use]
    pub fn role(&self) -> PeerRole {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> PeerLinkState {
        self.state
    }

    pub fn mark_connected(&mut self) {
        if self.state == PeerLinkState::New {
            self.state = PeerLinkState::Connected;
        }
    }

    /// # Errors
    ///
    /// `PeerError::Closed` once closed, otherwise whatever the transport
    /// reports.
    pub async fn apply_remote(&mut self, payload: &SignalPayload) -> Result<(), PeerError> {
        if self.state == PeerLinkState::Closed {
            return Err(PeerError::Closed);
        }
        self.connection.apply_remote(payload).await
    }

    /// # Errors
    ///
    /// `PeerError::Closed` once closed, otherwise whatever the transport
    /// reports.
    pub async fn replace_track(
        &mut self,
        kind: TrackKind,
        track: Option<&MediaTrack>,
    ) -> Result<(), PeerError> {
        if self.state == PeerLinkState::Closed {
            return Err(PeerError::Closed);
        }
        self.connection.replace_track(kind, track).await
    }

    /// Close the link. The link counts as closed even if the transport
    /// reports an error.
    ///
    /// # Errors
    ///
    /// Whatever the transport reports while releasing the connection.
    pub async fn close(&mut self) -> Result<(), PeerError> {
        if self.state == PeerLinkState::Closed {
            return Ok(());
        }
        self.state = PeerLinkState::Closed;
        self.connection.close().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingConnection {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PeerConnection for CountingConnection {
        async fn apply_remote(&mut self, _payload: &SignalPayload) -> Result<(), PeerError> {
            Ok(())
        }

        async fn replace_track(
            &mut self,
            _kind: TrackKind,
            _track: Option<&MediaTrack>,
        ) -> Result<(), PeerError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), PeerError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(PeerError::Connect("already torn down".to_string()))
        }
    }

    fn link(closes: &Arc<AtomicUsize>) -> PeerLink {
        PeerLink::new(
            1,
            ConnectionId::from("c2"),
            PeerRole::Initiator,
            Box::new(CountingConnection {
                closes: Arc::clone(closes),
            }),
        )
    }

    #[tokio::test]
    async fn test_close_is_final_even_when_transport_errors() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut link = link(&closes);
        link.mark_connected();
        assert_eq!(link.state(), PeerLinkState::Connected);

        assert!(link.close().await.is_err());
        assert_eq!(link.state(), PeerLinkState::Closed);

        // Second close does not reach the transport.
        assert!(link.close().await.is_ok());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let payload = SignalPayload::new("answer");
        assert_eq!(link.apply_remote(&payload).await, Err(PeerError::Closed));
    }

    #[tokio::test]
    async fn test_sink_tags_events_with_link() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = PeerEventSink::new(7, ConnectionId::from("c3"), tx);
        sink.emit(PeerEventKind::Connected);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.link_id, 7);
        assert_eq!(event.peer.as_str(), "c3");
        assert_eq!(event.kind, PeerEventKind::Connected);
    }
}
