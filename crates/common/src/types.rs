//! Identifier types shared by the room service and client.

use crate::error::ProtocolError;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Alphabet for room codes (36 symbols).
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a room code.
pub const ROOM_CODE_LENGTH: usize = 10;

/// Largest multiple of 36 that fits in a byte. Bytes at or above it are
/// rejected so every symbol is equally likely.
const ROOM_CODE_REJECTION_LIMIT: u8 = 252;

/// Code of a room, e.g. `AB12CD34EF`.
///
/// Always exactly [`ROOM_CODE_LENGTH`] characters from `[A-Z0-9]`. Parsing
/// accepts lower case input and normalises it to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a random room code from the system CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Rng` if the random source fails.
    pub fn generate() -> Result<Self, ProtocolError> {
        let rng = SystemRandom::new();
        let mut code = String::with_capacity(ROOM_CODE_LENGTH);
        let mut buf = [0u8; 16];

        while code.len() < ROOM_CODE_LENGTH {
            rng.fill(&mut buf).map_err(|_| ProtocolError::Rng)?;
            for &b in &buf {
                if b >= ROOM_CODE_REJECTION_LIMIT {
                    continue;
                }
                if let Some(&ch) = ROOM_CODE_ALPHABET.get(usize::from(b % 36)) {
                    code.push(char::from(ch));
                }
                if code.len() == ROOM_CODE_LENGTH {
                    break;
                }
            }
        }

        Ok(Self(code))
    }

    /// Borrow the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_uppercase();
        let valid = normalised.len() == ROOM_CODE_LENGTH
            && normalised
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());

        if valid {
            Ok(Self(normalised))
        } else {
            Err(ProtocolError::InvalidRoomCode(s.to_string()))
        }
    }
}

impl TryFrom<String> for RoomCode {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ephemeral identifier of one client's live signaling channel.
///
/// Minted by the server when the channel opens; never reused and never a
/// durable user identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Mint a fresh connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable user identifier, owned by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for SessionId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidSessionId(s.to_string()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_room_code_shape() {
        for _ in 0..64 {
            let code = RoomCode::generate().unwrap();
            assert_eq!(code.as_str().len(), ROOM_CODE_LENGTH);
            assert!(code
                .as_str()
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_generated_room_codes_differ() {
        let codes: HashSet<RoomCode> = (0..100).map(|_| RoomCode::generate().unwrap()).collect();
        assert_eq!(codes.len(), 100);
    }

    #[test]
    fn test_room_code_parse_normalises_case() {
        let code: RoomCode = "ab12cd34ef".parse().unwrap();
        assert_eq!(code.as_str(), "AB12CD34EF");
    }

    #[test]
    fn test_room_code_rejects_bad_input() {
        assert!("AB12".parse::<RoomCode>().is_err());
        assert!("AB12CD34EF0".parse::<RoomCode>().is_err());
        assert!("AB12-D34EF".parse::<RoomCode>().is_err());
        assert!("".parse::<RoomCode>().is_err());
    }

    #[test]
    fn test_room_code_serde_validates() {
        let code: RoomCode = serde_json::from_str("\"AB12CD34EF\"").unwrap();
        assert_eq!(code.to_string(), "AB12CD34EF");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"AB12CD34EF\"");

        let bad: Result<RoomCode, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }
}
