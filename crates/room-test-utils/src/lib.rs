//! # Room Test Utilities
//!
//! Shared test utilities for the room service and the room client.
//!
//! ## Modules
//!
//! - `mock_transport` - scripted signaling transport with test-side channel ends
//! - `mock_media` - capture devices with per-constraint failures
//! - `mock_peers` - recording peer connector standing in for the media stack
//! - `fixtures` - room codes, users and fast client configs
//! - `server_harness` - in-process room service on a random port, plus a raw
//!   WebSocket signaling client
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestRoomServer::spawn().await.unwrap();
//!     let room = server.create_room("alice").await.unwrap();
//!
//!     let mut c1 = TestSignalingClient::connect(&server.ws_url()).await.unwrap();
//!     let joined = c1.join(&room, "alice").await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod mock_media;
pub mod mock_peers;
pub mod mock_transport;
pub mod server_harness;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_media::*;
pub use mock_peers::*;
pub use mock_transport::*;
pub use server_harness::*;
