//! Peer link orchestration.
//!
//! One [`PeerOrchestrator`] actor per client owns the room membership as seen
//! by this client, one [`PeerLink`] per remote connection, and the local media
//! source those links send from.
//!
//! ```text
//! server messages ──► PeerOrchestrator ──► ClientMessage::Signal (to relay)
//!                          │    ▲
//!            connect/apply │    │ PeerEvent (local signal, connected, failed)
//!                          ▼    │
//!                    PeerConnector / PeerConnection (media transport)
//! ```
//!
//! Ordering: member announcements and relayed payloads that arrive while a
//! join is in flight are buffered and replayed after the join
//! acknowledgment has created the initiator links.

pub mod link;
pub mod orchestrator;

pub use link::{
    PeerConnection, PeerConnector, PeerEvent, PeerEventKind, PeerEventSink, PeerLink,
    PeerLinkState, PeerRole,
};
pub use orchestrator::{
    JoinAck, OrchestratorStatus, PeerOrchestrator, PeerOrchestratorHandle, PeerSummary,
    ReplaceReport, RoomPhase, TeardownReport,
};
