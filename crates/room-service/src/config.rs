//! Room service configuration.
//!
//! Configuration is loaded from environment variables. The database URL is
//! held in a `SecretString` and redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default size of the database connection pool.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Default number of room code generations tried before giving up.
pub const DEFAULT_ROOM_CODE_MAX_ATTEMPTS: u32 = 8;

/// Default instance identifier prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rc";

/// Room service configuration.
#[derive(Clone)]
pub struct Config {
    /// Address the HTTP API and WebSocket gateway listen on.
    pub bind_address: String,

    /// Postgres connection URL. When absent the in-memory store is used.
    pub database_url: Option<SecretString>,

    /// Maximum pooled database connections.
    pub db_max_connections: u32,

    /// Upper bound on room code generation attempts per `CreateRoom`.
    pub room_code_max_attempts: u32,

    /// Identifier of this instance, used in logs.
    pub instance_id: String,

    /// Emit logs as JSON.
    pub log_json: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("db_max_connections", &self.db_max_connections)
            .field("room_code_max_attempts", &self.room_code_max_attempts)
            .field("instance_id", &self.instance_id)
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse
    /// or is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse
    /// or is zero.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let database_url = vars
            .get("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| SecretString::from(url.clone()));

        let db_max_connections =
            parse_positive(vars, "RC_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?;

        let room_code_max_attempts = parse_positive(
            vars,
            "RC_ROOM_CODE_MAX_ATTEMPTS",
            DEFAULT_ROOM_CODE_MAX_ATTEMPTS,
        )?;

        let instance_id = vars.get("RC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            format!(
                "{}-{}",
                DEFAULT_INSTANCE_ID_PREFIX,
                uuid::Uuid::new_v4().simple()
            )
        });

        let log_json = vars
            .get("RC_LOG_JSON")
            .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"));

        Ok(Config {
            bind_address,
            database_url,
            db_max_connections,
            room_code_max_attempts,
            instance_id,
            log_json,
        })
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: u32,
) -> Result<u32, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(0) => Err(ConfigError::InvalidValue(format!(
                "{key} must be greater than zero"
            ))),
            Ok(value) => Ok(value),
            Err(e) => Err(ConfigError::InvalidValue(format!("{key}={raw}: {e}"))),
        },
    }
}
