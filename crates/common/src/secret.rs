//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types. Connection strings that embed
//! credentials (for example `DATABASE_URL`) are held as [`SecretString`] so
//! a derived or hand-written `Debug` never prints them.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreSettings {
//!     database_url: SecretString,
//! }
//!
//! let settings = StoreSettings {
//!     database_url: SecretString::from("postgres://rc:pw@db/rooms"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("pw@db"));
//! assert_eq!(settings.database_url.expose_secret(), "postgres://rc:pw@db/rooms");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
