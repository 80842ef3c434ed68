//! Signaling transport abstraction.
//!
//! A transport opens one signaling channel at a time. The opened channel is
//! a pair of queues; the inbound queue ends (`recv` returns `None`) when the
//! channel drops, which is how the supervisor detects an unexpected closure.

pub mod websocket;

use crate::errors::TransportError;
use async_trait::async_trait;
use common::protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;

pub use websocket::WebSocketTransport;

/// Queue depth of each direction of a signaling link.
pub const LINK_CHANNEL_BUFFER: usize = 256;

/// Lifecycle of the transport's current channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// Never opened.
    Idle,
    /// Handshake in progress.
    Opening,
    Open,
    Closed,
}

impl TransportStatus {
    /// Whether the channel is mid-transition and should be re-polled rather
    /// than replaced.
    #[must_use]
    pub const fn is_transitional(&self) -> bool {
        matches!(self, TransportStatus::Opening)
    }
}

/// One open signaling channel.
#[derive(Debug)]
pub struct SignalingLink {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<ServerMessage>,
}

/// Opens signaling channels to the room service.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open a new channel.
    async fn open(&self) -> Result<SignalingLink, TransportError>;

    /// Status of the most recently opened channel.
    fn status(&self) -> TransportStatus;
}
