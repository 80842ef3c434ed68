//! Room Service Library
//!
//! Server side of the room coordinator:
//!
//! - Live room membership with one host per room (actor per room)
//! - Relay of opaque negotiation payloads between two connections
//! - Call session and attendance tracking over a durable store
//! - Room lifecycle (create, host check, close) for the surrounding application
//!
//! # Architecture
//!
//! ```text
//! gateway/ws.rs ──> actors (registry -> room -> connection)
//!       │      ──> relay (connection directory)
//!       └────────> rooms -> tracker -> store (Postgres | memory)
//! ```
//!
//! # Modules
//!
//! - `actors` - Room registry actor model
//! - `config` - Service configuration from environment
//! - `errors` - Error types with client codes and HTTP status mapping
//! - `gateway` - WebSocket signaling and REST handlers
//! - `models` - Durable entities
//! - `observability` - Health probes and Prometheus metrics
//! - `relay` - Signal relay
//! - `rooms` - Room lifecycle
//! - `store` - Durable store interface and implementations
//! - `tracker` - Session and attendance tracker

pub mod actors;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod observability;
pub mod relay;
pub mod rooms;
pub mod store;
pub mod tracker;
