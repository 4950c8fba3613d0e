//! Handshake Signal Relay
//!
//! Minimal signaling relay for peer-to-peer connection setup. Peers that
//! cannot yet reach each other exchange session descriptions and
//! connectivity candidates through short-lived relay state, then talk
//! directly. The relay never carries media.
//!
//! # Variants
//!
//! - **Addressed**: named users send messages to each other's mailboxes and
//!   poll them with `receive`. Messages are delivered at most once and expire
//!   after a TTL; presence is refreshed on every request.
//! - **Pairwise**: one shared offer/answer/candidates record for exactly two
//!   peers, reset explicitly.
//!
//! # Security
//!
//! Callers are not authenticated: any caller may claim any `from`, `to` or
//! `userId`, and `clear` is open to everyone. Put the relay behind an
//! authenticating proxy before exposing it publicly.

pub mod error;
pub mod mailbox;
pub mod pairwise;
pub mod server;
pub mod storage;

pub use error::RelayError;
pub use mailbox::{AddressedRelay, Params, Reply};
pub use pairwise::{PairwiseRelay, PollReply, SubmitReply};
pub use server::{router, AppState, RelayServer};
pub use storage::{
    transact, JsonFileStore, MemoryStore, SqliteDatabase, SqliteStore, StorageError, Store,
};
