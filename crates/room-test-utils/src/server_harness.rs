//! Test server harness for E2E testing
//!
//! Provides `TestRoomServer` for spawning real room service instances in
//! tests, backed by the in-memory store, and `TestSignalingClient` for
//! speaking the signaling protocol to it directly.

use common::protocol::{ClientMessage, ServerMessage};
use common::types::{ConnectionId, RoomCode, UserId};
use futures::{SinkExt, StreamExt};
use room_service::actors::{ActorMetrics, RoomRegistryHandle};
use room_service::gateway::{build_router, AppState};
use room_service::observability::health::HealthState;
use room_service::store::{CallStore, MemoryCallStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long `TestSignalingClient` waits for a frame.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Test harness for spawning the room service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<(), anyhow::Error> {
///     let server = TestRoomServer::spawn().await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRoomServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    store: Arc<MemoryCallStore>,
    health: Arc<HealthState>,
    _handle: JoinHandle<()>,
}

impl TestRoomServer {
    /// Spawn a server on a random local port with an empty in-memory store.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        let store = Arc::new(MemoryCallStore::new());
        let registry = RoomRegistryHandle::new("test-instance".to_string(), ActorMetrics::new());
        let state = Arc::new(AppState::new(
            Arc::clone(&store) as Arc<dyn CallStore>,
            registry,
            5,
        ));

        let health = Arc::new(HealthState::new());
        health.set_ready();

        let app = build_router(Arc::clone(&state), Arc::clone(&health), None);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            store,
            health,
            _handle: handle,
        })
    }

    /// Base HTTP URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signaling endpoint URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn store(&self) -> &Arc<MemoryCallStore> {
        &self.store
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    /// Create a room under a random code.
    pub async fn create_room(&self, creator: &str) -> Result<RoomCode, anyhow::Error> {
        Ok(self.state.rooms.create_room(&UserId::from(creator)).await?)
    }

    /// Create a room under a fixed code.
    pub async fn create_room_with_code(
        &self,
        code: &str,
        creator: &str,
    ) -> Result<RoomCode, anyhow::Error> {
        let code: RoomCode = code.parse()?;
        let inserted = self
            .store
            .create_room(&code, &UserId::from(creator))
            .await?;
        anyhow::ensure!(inserted, "room code {code} already taken");
        Ok(code)
    }
}

impl Drop for TestRoomServer {
    fn drop(&mut self) {
        self.state.registry.cancel();
        self._handle.abort();
    }
}

/// A raw signaling client speaking JSON frames to a `TestRoomServer`.
pub struct TestSignalingClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    connection_id: ConnectionId,
}

impl TestSignalingClient {
    /// Connect and consume the `welcome` frame.
    pub async fn connect(ws_url: &str) -> Result<Self, anyhow::Error> {
        let (socket, _) = connect_async(ws_url).await?;
        let mut client = Self {
            socket,
            connection_id: ConnectionId::from(""),
        };

        match client.recv().await? {
            ServerMessage::Welcome { connection_id } => client.connection_id = connection_id,
            other => anyhow::bail!("expected welcome, got {other:?}"),
        }
        Ok(client)
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), anyhow::Error> {
        self.socket.send(Message::Text(message.to_json()?)).await?;
        Ok(())
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.socket.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Next server frame.
    pub async fn recv(&mut self) -> Result<ServerMessage, anyhow::Error> {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.socket.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for server frame"))?
                .ok_or_else(|| anyhow::anyhow!("socket closed"))??;

            match frame {
                Message::Text(text) => return Ok(ServerMessage::from_json(&text)?),
                Message::Close(_) => anyhow::bail!("socket closed"),
                _ => continue,
            }
        }
    }

    /// Skip frames until one matches `predicate`.
    pub async fn recv_until(
        &mut self,
        predicate: impl Fn(&ServerMessage) -> bool,
    ) -> Result<ServerMessage, anyhow::Error> {
        loop {
            let message = self.recv().await?;
            if predicate(&message) {
                return Ok(message);
            }
        }
    }

    /// Join a room and return the `joined` or `error` reply.
    pub async fn join(&mut self, room: &RoomCode, user: &str) -> Result<ServerMessage, anyhow::Error> {
        self.send(&ClientMessage::JoinRoom {
            room_code: room.clone(),
            user_id: UserId::from(user),
        })
        .await?;
        self.recv_until(|m| {
            matches!(m, ServerMessage::Joined { .. } | ServerMessage::Error { .. })
        })
        .await
    }

    /// Expect no frame for `quiet`.
    pub async fn expect_silence(&mut self, quiet: Duration) -> Result<(), anyhow::Error> {
        match tokio::time::timeout(quiet, self.socket.next()).await {
            Err(_) => Ok(()),
            Ok(frame) => anyhow::bail!("unexpected frame: {frame:?}"),
        }
    }

    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.socket.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestRoomServer::spawn().await?;
        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        Ok(())
    }

    #[tokio::test]
    async fn test_signaling_client_gets_welcome() -> Result<(), anyhow::Error> {
        let server = TestRoomServer::spawn().await?;
        let client = TestSignalingClient::connect(&server.ws_url()).await?;
        assert!(!client.connection_id().as_str().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_servers_different_ports() -> Result<(), anyhow::Error> {
        let server1 = TestRoomServer::spawn().await?;
        let server2 = TestRoomServer::spawn().await?;
        assert_ne!(server1.addr(), server2.addr());
        Ok(())
    }
}
