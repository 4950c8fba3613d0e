//! Durable store abstraction
//!
//! The relay only ever touches shared state through [`Store`]. Every mutation
//! goes through [`Store::update`], which runs the whole read-compute-write
//! cycle inside one exclusive critical section, so two concurrent writers can
//! never interleave and drop each other's changes.

mod json_file;
mod memory;
mod sqlite;

use std::fmt;

use tracing::error;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::{SqliteDatabase, SqliteStore};

/// A single document of relay state behind an exclusive-access discipline
pub trait Store<S>: Send + Sync {
    /// Current state. Missing or malformed backing data reads as the default.
    fn read(&self) -> Result<S, StorageError>;

    /// Run `f` on the current state and persist the result, all under one
    /// exclusive lock
    fn update(&self, f: &mut dyn FnMut(&mut S)) -> Result<(), StorageError>;

    /// Overwrite the state unconditionally
    fn replace(&self, state: S) -> Result<(), StorageError> {
        let mut next = Some(state);
        self.update(&mut |current| {
            if let Some(state) = next.take() {
                *current = state;
            }
        })
    }

    /// Whether writes are expected to succeed
    fn is_writable(&self) -> bool;

    /// Human-readable location, for status reports
    fn describe(&self) -> String;
}

/// Run `f` inside the store's critical section and hand back its result
pub fn transact<S, T, B>(store: &B, f: impl FnOnce(&mut S) -> T) -> Result<T, StorageError>
where
    B: Store<S> + ?Sized,
{
    let mut f = Some(f);
    let mut out = None;
    store.update(&mut |state| {
        if let Some(f) = f.take() {
            out = Some(f(state));
        }
    })?;
    out.ok_or(StorageError::NotApplied)
}

/// Storage errors
#[derive(Debug)]
pub enum StorageError {
    /// Backing file could not be opened, locked, read or written
    Io(std::io::Error),
    /// State could not be serialized
    Json(serde_json::Error),
    /// SQLite failure
    Database(rusqlite::Error),
    /// Mutex lock was poisoned (a thread panicked while holding the lock)
    LockPoisoned,
    /// The backend returned without running the update
    NotApplied,
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        error!("Storage I/O error: {}", e);
        StorageError::Io(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        error!("Storage serialization error: {}", e);
        StorageError::Json(e)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        error!("Database error: {:?}", e);
        StorageError::Database(e)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "I/O error: {}", e),
            StorageError::Json(e) => write!(f, "Serialization error: {}", e),
            StorageError::Database(e) => write!(f, "Database error: {}", e),
            StorageError::LockPoisoned => {
                write!(f, "Lock poisoned: a thread panicked while holding the lock")
            }
            StorageError::NotApplied => write!(f, "Update was not applied"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Json(e) => Some(e),
            StorageError::Database(e) => Some(e),
            _ => None,
        }
    }
}

/// Decode a stored document, falling back to the default on malformed data
fn decode_or_default<S>(raw: &str, location: &str) -> S
where
    S: serde::de::DeserializeOwned + Default,
{
    if raw.trim().is_empty() {
        return S::default();
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Discarding malformed state in {}: {}", location, e);
        S::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transact_returns_value() {
        let store = MemoryStore::new(vec![1, 2, 3]);
        let popped = transact(&store, |v: &mut Vec<i32>| v.pop()).unwrap();

        assert_eq!(popped, Some(3));
        assert_eq!(store.read().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_replace() {
        let store = MemoryStore::new(String::from("old"));
        store.replace("new".into()).unwrap();
        assert_eq!(store.read().unwrap(), "new");
    }

    #[test]
    fn test_decode_or_default() {
        let v: Vec<u32> = decode_or_default("[1,2]", "test");
        assert_eq!(v, vec![1, 2]);

        let v: Vec<u32> = decode_or_default("   ", "test");
        assert!(v.is_empty());

        let v: Vec<u32> = decode_or_default("{\"truncated\":", "test");
        assert!(v.is_empty());
    }
}
