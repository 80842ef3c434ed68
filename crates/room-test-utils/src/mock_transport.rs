//! Mock signaling transport for client tests.
//!
//! Each `open` consumes the next scripted outcome. Accepted opens hand the
//! test a [`ServerEnd`] so it can play the server: read what the client sent,
//! push frames back, or drop the end to simulate a lost channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use room_test_utils::MockSignalingTransport;
//!
//! // Initial connect succeeds, the next 6 opens fail, then one succeeds.
//! let transport = MockSignalingTransport::builder()
//!     .accept()
//!     .refuse(6)
//!     .accept()
//!     .build();
//! ```

use async_trait::async_trait;
use common::protocol::{ClientMessage, ServerMessage};
use common::types::ConnectionId;
use room_client::errors::TransportError;
use room_client::transport::{SignalingLink, SignalingTransport, TransportStatus};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Outcome of one `open` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Accept,
    Refuse,
    /// Accept, but the server end is gone before the client reads anything.
    AcceptClosed,
}

/// The server side of one accepted channel.
#[derive(Debug)]
pub struct ServerEnd {
    pub from_client: mpsc::Receiver<ClientMessage>,
    pub to_client: mpsc::Sender<ServerMessage>,
}

impl ServerEnd {
    /// Push a frame to the client.
    pub async fn send(&self, message: ServerMessage) {
        self.to_client
            .send(message)
            .await
            .expect("client inbound queue closed");
    }

    pub async fn welcome(&self, connection_id: &str) {
        self.send(ServerMessage::Welcome {
            connection_id: ConnectionId::from(connection_id),
        })
        .await;
    }

    /// Next frame from the client, failing the test after 5 seconds.
    pub async fn recv(&mut self) -> ClientMessage {
        tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client outbound queue closed")
    }
}

struct State {
    script: VecDeque<OpenOutcome>,
    otherwise: OpenOutcome,
    status: TransportStatus,
    forced_status: Option<TransportStatus>,
    opens: Vec<Instant>,
}

pub struct MockSignalingTransport {
    state: Mutex<State>,
    ends_tx: mpsc::UnboundedSender<ServerEnd>,
    ends_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEnd>>,
}

impl MockSignalingTransport {
    #[must_use]
    pub fn builder() -> MockSignalingTransportBuilder {
        MockSignalingTransportBuilder::default()
    }

    /// Accept every open.
    #[must_use]
    pub fn accepting() -> Self {
        Self::builder().build()
    }

    /// Refuse every open.
    #[must_use]
    pub fn refusing() -> Self {
        Self::builder().otherwise(OpenOutcome::Refuse).build()
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    /// When each `open` call happened (Tokio clock, so paused time works).
    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().opens.clone()
    }

    /// Override the reported status; `None` restores the real one.
    pub fn force_status(&self, status: Option<TransportStatus>) {
        self.state.lock().unwrap().forced_status = status;
    }

    /// Server end of the next accepted channel.
    pub async fn next_server_end(&self) -> ServerEnd {
        let mut ends = self.ends_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(120), ends.recv())
            .await
            .expect("timed out waiting for an accepted channel")
            .expect("transport dropped")
    }
}

#[async_trait]
impl SignalingTransport for MockSignalingTransport {
    async fn open(&self) -> Result<SignalingLink, TransportError> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.opens.push(Instant::now());
            let otherwise = state.otherwise;
            state.script.pop_front().unwrap_or(otherwise)
        };

        match outcome {
            OpenOutcome::Refuse => {
                self.state.lock().unwrap().status = TransportStatus::Closed;
                Err(TransportError::Connect("refused by mock".to_string()))
            }
            OpenOutcome::Accept => {
                let (outbound, from_client) = mpsc::channel(64);
                let (to_client, inbound) = mpsc::channel(64);
                self.state.lock().unwrap().status = TransportStatus::Open;
                let _ = self.ends_tx.send(ServerEnd {
                    from_client,
                    to_client,
                });
                Ok(SignalingLink { outbound, inbound })
            }
            OpenOutcome::AcceptClosed => {
                let (outbound, _from_client) = mpsc::channel(1);
                let (_to_client, inbound) = mpsc::channel(1);
                self.state.lock().unwrap().status = TransportStatus::Closed;
                Ok(SignalingLink { outbound, inbound })
            }
        }
    }

    fn status(&self) -> TransportStatus {
        let state = self.state.lock().unwrap();
        state.forced_status.unwrap_or(state.status)
    }
}

/// Builder for `MockSignalingTransport`.
#[derive(Debug)]
pub struct MockSignalingTransportBuilder {
    script: VecDeque<OpenOutcome>,
    otherwise: OpenOutcome,
}

impl Default for MockSignalingTransportBuilder {
    fn default() -> Self {
        Self {
            script: VecDeque::new(),
            otherwise: OpenOutcome::Accept,
        }
    }
}

impl MockSignalingTransportBuilder {
    /// Accept the next open.
    #[must_use]
    pub fn accept(mut self) -> Self {
        self.script.push_back(OpenOutcome::Accept);
        self
    }

    /// Accept the next open with a channel that is already closed.
    #[must_use]
    pub fn accept_closed(mut self) -> Self {
        self.script.push_back(OpenOutcome::AcceptClosed);
        self
    }

    /// Refuse the next `count` opens.
    #[must_use]
    pub fn refuse(mut self, count: usize) -> Self {
        self.script
            .extend(std::iter::repeat(OpenOutcome::Refuse).take(count));
        self
    }

    /// Outcome once the script is used up (default: accept).
    #[must_use]
    pub fn otherwise(mut self, outcome: OpenOutcome) -> Self {
        self.otherwise = outcome;
        self
    }

    #[must_use]
    pub fn build(self) -> MockSignalingTransport {
        let (ends_tx, ends_rx) = mpsc::unbounded_channel();
        MockSignalingTransport {
            state: Mutex::new(State {
                script: self.script,
                otherwise: self.otherwise,
                status: TransportStatus::Idle,
                forced_status: None,
                opens: Vec::new(),
            }),
            ends_tx,
            ends_rx: tokio::sync::Mutex::new(ends_rx),
        }
    }
}
