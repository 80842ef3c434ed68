//! Pre-configured test data.

use common::types::{ConnectionId, RoomCode, UserId};
use room_client::ClientConfig;
use std::time::Duration;

/// Room code used across scenario tests.
pub const TEST_ROOM_CODE: &str = "AB12CD34EF";

pub fn test_room_code() -> RoomCode {
    TEST_ROOM_CODE.parse().expect("test room code is valid")
}

pub fn test_user(name: &str) -> UserId {
    UserId::from(name)
}

pub fn test_connection(id: &str) -> ConnectionId {
    ConnectionId::from(id)
}

/// Client config pointed at `server_url` with a short join timeout.
pub fn test_client_config(server_url: &str) -> ClientConfig {
    ClientConfig {
        server_url: server_url.to_string(),
        join_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures() {
        assert_eq!(test_room_code().as_str(), TEST_ROOM_CODE);
        assert_eq!(test_user("alice").as_str(), "alice");
        let config = test_client_config("ws://127.0.0.1:1/ws");
        assert_eq!(config.max_reconnect_attempts, 5);
    }
}
