//! JSON signaling protocol spoken over the signaling channel.
//!
//! Every frame is a single JSON object tagged by `type`:
//!
//! ```text
//! client -> server: {"type":"join_room","room_code":"AB12CD34EF","user_id":"alice"}
//! server -> client: {"type":"joined","room_code":"AB12CD34EF","members":["c1"],...}
//! ```
//!
//! Negotiation payloads are carried as an opaque string ([`SignalPayload`]);
//! neither the server nor this crate interprets them.

use crate::error::ProtocolError;
use crate::types::{ConnectionId, RoomCode, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Opaque negotiation payload (local/remote description or ICE candidate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(pub String);

impl SignalPayload {
    /// Wrap a payload string.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    /// Borrow the payload.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room; answered with [`ServerMessage::Joined`].
    JoinRoom { room_code: RoomCode, user_id: UserId },

    /// Leave a room explicitly.
    LeaveRoom { room_code: RoomCode },

    /// Relay a negotiation payload to one other connection.
    Signal {
        to: ConnectionId,
        payload: SignalPayload,
    },

    /// End the room for everyone (host only).
    CloseRoom { room_code: RoomCode },

    /// Report local media flags.
    MediaState {
        room_code: RoomCode,
        video: bool,
        audio: bool,
        screen_share: bool,
    },

    /// Host mutes or unmutes another user.
    HostMute {
        room_code: RoomCode,
        target_user_id: UserId,
        muted: bool,
    },

    /// Liveness probe.
    Ping,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every channel.
    Welcome { connection_id: ConnectionId },

    /// Join acknowledgment with the members present before the caller.
    Joined {
        room_code: RoomCode,
        members: Vec<ConnectionId>,
        is_host: bool,
        session_id: Option<SessionId>,
    },

    /// Another connection joined a room this connection is in.
    MemberJoined {
        room_code: RoomCode,
        connection_id: ConnectionId,
    },

    /// Another connection left (or dropped from) a room this connection is in.
    MemberLeft {
        room_code: RoomCode,
        connection_id: ConnectionId,
    },

    /// Negotiation payload relayed from another connection.
    Signal {
        from: ConnectionId,
        payload: SignalPayload,
    },

    /// The host closed the room.
    RoomEnded { room_code: RoomCode },

    /// The host changed this user's mute flag.
    MutedByHost { room_code: RoomCode, muted: bool },

    /// A request failed.
    Error { code: String, message: String },

    /// Reply to [`ClientMessage::Ping`].
    Pong,
}

impl ClientMessage {
    /// Decode a client frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if the frame is not a valid message.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Encode as a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::LeaveRoom { .. } => "leave_room",
            ClientMessage::Signal { .. } => "signal",
            ClientMessage::CloseRoom { .. } => "close_room",
            ClientMessage::MediaState { .. } => "media_state",
            ClientMessage::HostMute { .. } => "host_mute",
            ClientMessage::Ping => "ping",
        }
    }
}

impl ServerMessage {
    /// Decode a server frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if the frame is not a valid message.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Encode as a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Build an error frame.
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_join_room_wire_format() {
        let msg = ClientMessage::JoinRoom {
            room_code: "AB12CD34EF".parse().unwrap(),
            user_id: UserId::from("alice"),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "join_room");
        assert_eq!(json["room_code"], "AB12CD34EF");
        assert_eq!(json["user_id"], "alice");
    }

    #[test]
    fn test_signal_payload_is_opaque() {
        let text = r#"{"type":"signal","to":"c2","payload":"{\"sdp\":\"v=0\"}"}"#;
        let msg = ClientMessage::from_json(text).unwrap();
        match msg {
            ClientMessage::Signal { to, payload } => {
                assert_eq!(to.as_str(), "c2");
                assert_eq!(payload.as_str(), "{\"sdp\":\"v=0\"}");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_joined_decodes() {
        let text = r#"{"type":"joined","room_code":"AB12CD34EF","members":["c1"],"is_host":false,"session_id":null}"#;
        let msg = ServerMessage::from_json(text).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Joined {
                room_code: "AB12CD34EF".parse().unwrap(),
                members: vec![ConnectionId::from("c1")],
                is_host: false,
                session_id: None,
            }
        );
    }

    #[test]
    fn test_invalid_room_code_rejected_at_decode() {
        let text = r#"{"type":"leave_room","room_code":"short"}"#;
        assert!(matches!(
            ClientMessage::from_json(text),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"dance"}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_ping_pong() {
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert_eq!(ServerMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
    }
}
