//! Handshake Core - Shared types, eviction policy, and validation
//!
//! This crate contains the building blocks of the Handshake signaling relay.
//! It has no dependencies on networking or storage code: everything here is
//! pure data and pure logic so the relay can be tested without I/O.

pub mod clock;
pub mod config;
pub mod error;
pub mod eviction;
pub mod id;
pub mod protocol;
pub mod types;
pub mod validate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, LoggingConfig, RelayConfig, ServerConfig, StorageBackend, StorageConfig};
pub use error::*;
pub use protocol::*;
pub use types::*;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// Messages older than this are evicted (5 minutes)
pub const MESSAGE_TTL_SECS: u64 = 300;

/// Presence records inactive for this long are evicted (1 minute)
pub const PRESENCE_TTL_SECS: u64 = 60;

/// Maximum number of stored messages across all mailboxes
pub const MAX_MESSAGES: usize = 1000;

/// Maximum size of a message payload in bytes
pub const MAX_DATA_BYTES: usize = 50_000;

/// Maximum length of a sender/recipient/user id after sanitizing
pub const MAX_ID_LEN: usize = 255;

/// Maximum length of a message type tag after sanitizing
pub const MAX_TYPE_LEN: usize = 50;
