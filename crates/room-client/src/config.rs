//! Client configuration.
//!
//! Reconnect and media policy are plain values so the embedding application
//! can tune them; nothing here is hardwired behavior.

use crate::media::MediaConstraints;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default signaling endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";

/// Default manual reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default automatic reconnect schedule after an unexpected drop, in seconds.
pub const DEFAULT_AUTO_RECONNECT_SCHEDULE_SECS: &[u64] = &[0, 2, 10, 30];

/// Default re-poll interval while the transport is mid-handshake.
pub const DEFAULT_TRANSITIONAL_POLL_MS: u64 = 500;

/// Default media fallback order.
pub const DEFAULT_MEDIA_FALLBACK_ORDER: &str = "audio+video,audio,video";

/// Default time to wait for a join acknowledgment.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling endpoint.
    pub server_url: String,

    /// Manual reconnect attempts before `SignalingConnectionFailed`.
    pub max_reconnect_attempts: u32,

    /// Delays before each automatic reconnect attempt.
    pub auto_reconnect_schedule: Vec<Duration>,

    /// Re-poll interval while the transport reports a handshake in progress.
    pub transitional_poll_interval: Duration,

    /// Constraint sets tried in order when acquiring local media.
    pub media_fallback_order: Vec<MediaConstraints>,

    pub join_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            auto_reconnect_schedule: DEFAULT_AUTO_RECONNECT_SCHEDULE_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            transitional_poll_interval: Duration::from_millis(DEFAULT_TRANSITIONAL_POLL_MS),
            media_fallback_order: MediaConstraints::default_fallback_order(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable does not parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let server_url = vars
            .get("ROOM_SERVER_URL")
            .cloned()
            .unwrap_or(defaults.server_url);
        if !(server_url.starts_with("ws://") || server_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(format!(
                "ROOM_SERVER_URL must be a ws:// or wss:// URL, got {server_url}"
            )));
        }

        let max_reconnect_attempts = match vars.get("ROOM_MAX_RECONNECT_ATTEMPTS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) if value > 0 => value,
                _ => {
                    return Err(ConfigError::InvalidValue(format!(
                        "ROOM_MAX_RECONNECT_ATTEMPTS must be a positive integer, got {raw}"
                    )))
                }
            },
            None => defaults.max_reconnect_attempts,
        };

        let auto_reconnect_schedule = match vars.get("ROOM_AUTO_RECONNECT_SCHEDULE_SECS") {
            Some(raw) => parse_schedule(raw)?,
            None => defaults.auto_reconnect_schedule,
        };

        let transitional_poll_interval = match vars.get("ROOM_TRANSITIONAL_POLL_MS") {
            Some(raw) => raw.parse::<u64>().map(Duration::from_millis).map_err(|e| {
                ConfigError::InvalidValue(format!("ROOM_TRANSITIONAL_POLL_MS: {e}"))
            })?,
            None => defaults.transitional_poll_interval,
        };

        let media_fallback_order = match vars.get("ROOM_MEDIA_FALLBACK_ORDER") {
            Some(raw) => parse_fallback_order(raw)?,
            None => defaults.media_fallback_order,
        };

        Ok(Self {
            server_url,
            max_reconnect_attempts,
            auto_reconnect_schedule,
            transitional_poll_interval,
            media_fallback_order,
            join_timeout: defaults.join_timeout,
        })
    }
}

/// Parse `"0,2,10,30"`. An empty string disables the automatic schedule.
fn parse_schedule(raw: &str) -> Result<Vec<Duration>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>().map(Duration::from_secs).map_err(|e| {
                ConfigError::InvalidValue(format!("ROOM_AUTO_RECONNECT_SCHEDULE_SECS: {e}"))
            })
        })
        .collect()
}

fn parse_fallback_order(raw: &str) -> Result<Vec<MediaConstraints>, ConfigError> {
    let order = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<MediaConstraints>()
                .map_err(|e| ConfigError::InvalidValue(format!("ROOM_MEDIA_FALLBACK_ORDER: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if order.is_empty() {
        return Err(ConfigError::InvalidValue(
            "ROOM_MEDIA_FALLBACK_ORDER must name at least one constraint set".to_string(),
        ));
    }
    Ok(order)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(
            config.auto_reconnect_schedule,
            vec![
                Duration::from_secs(0),
                Duration::from_secs(2),
                Duration::from_secs(10),
                Duration::from_secs(30)
            ]
        );
        assert_eq!(
            config.media_fallback_order,
            vec![
                MediaConstraints::AUDIO_VIDEO,
                MediaConstraints::AUDIO_ONLY,
                MediaConstraints::VIDEO_ONLY
            ]
        );
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_vars(&vars(&[
            ("ROOM_SERVER_URL", "wss://rooms.example.com/ws"),
            ("ROOM_MAX_RECONNECT_ATTEMPTS", "3"),
            ("ROOM_AUTO_RECONNECT_SCHEDULE_SECS", "1, 5"),
            ("ROOM_TRANSITIONAL_POLL_MS", "250"),
            ("ROOM_MEDIA_FALLBACK_ORDER", "audio"),
        ]))
        .unwrap();

        assert_eq!(config.server_url, "wss://rooms.example.com/ws");
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(
            config.auto_reconnect_schedule,
            vec![Duration::from_secs(1), Duration::from_secs(5)]
        );
        assert_eq!(config.transitional_poll_interval, Duration::from_millis(250));
        assert_eq!(config.media_fallback_order, vec![MediaConstraints::AUDIO_ONLY]);
    }

    #[test]
    fn test_empty_schedule_disables_automatic_reconnect() {
        let config =
            ClientConfig::from_vars(&vars(&[("ROOM_AUTO_RECONNECT_SCHEDULE_SECS", "")])).unwrap();
        assert!(config.auto_reconnect_schedule.is_empty());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ClientConfig::from_vars(&vars(&[("ROOM_SERVER_URL", "http://x")])).is_err());
        assert!(ClientConfig::from_vars(&vars(&[("ROOM_MAX_RECONNECT_ATTEMPTS", "0")])).is_err());
        assert!(
            ClientConfig::from_vars(&vars(&[("ROOM_AUTO_RECONNECT_SCHEDULE_SECS", "1,x")]))
                .is_err()
        );
        assert!(ClientConfig::from_vars(&vars(&[("ROOM_MEDIA_FALLBACK_ORDER", "smell")])).is_err());
        assert!(ClientConfig::from_vars(&vars(&[("ROOM_MEDIA_FALLBACK_ORDER", " , ")])).is_err());
    }
}
