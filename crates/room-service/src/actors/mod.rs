//! Actor model for the room registry.
//!
//! ```text
//! RoomRegistryActor (singleton per instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room)
//!         └── holds handles to the ConnectionActors of its members
//!
//! ConnectionActor (one per signaling channel, child of the registry token)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Per-room serialisation**: membership changes for a room run only inside
//!   its `RoomActor`; the registry serialises entry creation and removal
//! - **Generation-checked vacancy**: an emptied room refuses joins and asks the
//!   registry to drop it; a late report never removes a newer entry
//! - **CancellationToken propagation**: room and connection actors receive
//!   child tokens of the registry's root token
//! - **Non-blocking delivery**: broadcasts use `try_send`; a full connection
//!   mailbox drops the message and is counted
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor` singleton
//! - [`room`] - `RoomActor` per live room
//! - [`connection`] - `ConnectionActor` per signaling channel
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::{RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle};
