//! Room Client Library
//!
//! Client side of the room coordinator:
//!
//! - [`supervisor`] - owns the signaling channel: connect, detect drops,
//!   reconnect with bounded backoff, foreground recovery
//! - [`media`] - local capture with the constraint fallback cascade
//! - [`peers`] - one peer link per remote participant, fed from a single
//!   local media source
//! - [`client`] - `RoomClient` facade wiring the above together
//!
//! Media transport itself (codecs, NAT traversal, encryption) stays behind
//! the [`peers::PeerConnector`] and [`media::MediaDevices`] traits.

pub mod client;
pub mod config;
pub mod errors;
pub mod media;
pub mod peers;
pub mod supervisor;
pub mod transport;

pub use client::{ClientNotice, JoinOutcome, RoomClient};
pub use config::ClientConfig;
pub use errors::{ClientError, PeerError, TransportError};
pub use supervisor::{ChannelState, ConnectionSupervisor, ReconnectPolicy, SupervisorEvent};
