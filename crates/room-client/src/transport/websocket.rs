//! WebSocket signaling transport.
//!
//! Frames are JSON text messages. A background task per channel pumps both
//! directions; it ends when the socket closes or the outbound sender is
//! dropped, which closes the inbound queue.

use super::{SignalingLink, SignalingTransport, TransportStatus, LINK_CHANNEL_BUFFER};
use crate::errors::TransportError;
use async_trait::async_trait;
use common::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// `tokio-tungstenite` transport to a `ws://` or `wss://` endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    status: Arc<watch::Sender<TransportStatus>>,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let (status, _) = watch::channel(TransportStatus::Idle);
        Self {
            url: url.into(),
            status: Arc::new(status),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn open(&self) -> Result<SignalingLink, TransportError> {
        self.status.send_replace(TransportStatus::Opening);

        let (stream, _response) = match connect_async(self.url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                self.status.send_replace(TransportStatus::Closed);
                return Err(TransportError::Connect(e.to_string()));
            }
        };

        info!(target: "client.transport", url = %self.url, "Signaling socket connected");

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(LINK_CHANNEL_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerMessage>(LINK_CHANNEL_BUFFER);

        self.status.send_replace(TransportStatus::Open);
        let status = Arc::clone(&self.status);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => match outbound {
                        Some(message) => {
                            let text = match message.to_json() {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!(target: "client.transport", error = %e, "Failed to encode client message");
                                    continue;
                                }
                            };
                            if sink.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            // Local side closed the channel.
                            let _ = sink.close().await;
                            break;
                        }
                    },

                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                            Ok(message) => {
                                if inbound_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(target: "client.transport", error = %e, "Undecodable server frame");
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(target: "client.transport", error = %e, "Socket read failed");
                            break;
                        }
                    },
                }
            }

            status.send_replace(TransportStatus::Closed);
            debug!(target: "client.transport", "Signaling socket closed");
        });

        Ok(SignalingLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn status(&self) -> TransportStatus {
        *self.status.borrow()
    }
}
