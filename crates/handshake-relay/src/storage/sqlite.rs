//! SQLite store
//!
//! Each relay document is one row of the `documents` table, holding the
//! document as JSON text. Updates run in a `BEGIN IMMEDIATE` transaction, so
//! the write lock is taken before the row is read.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use super::{decode_or_default, Store, StorageError};

/// How long a writer waits on another connection's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared SQLite connection holding every relay document
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl SqliteDatabase {
    /// Open or create a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn, path.display().to_string())
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?, ":memory:".into())
    }

    fn init(conn: Connection, location: String) -> Result<Self, StorageError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                name TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        info!("Storage schema initialized at {}", location);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    /// Handle to the document called `name`
    pub fn document<S>(&self, name: &str) -> SqliteStore<S> {
        SqliteStore {
            db: self.clone(),
            name: name.to_string(),
            _state: PhantomData,
        }
    }
}

/// One named document inside a [`SqliteDatabase`]
pub struct SqliteStore<S> {
    db: SqliteDatabase,
    name: String,
    _state: PhantomData<fn() -> S>,
}

impl<S> SqliteStore<S>
where
    S: DeserializeOwned + Default,
{
    fn decode(&self, body: Option<String>) -> S {
        match body {
            Some(body) => decode_or_default(&body, &self.describe_location()),
            None => S::default(),
        }
    }

    fn describe_location(&self) -> String {
        format!("{}#{}", self.db.location, self.name)
    }
}

impl<S> Store<S> for SqliteStore<S>
where
    S: Serialize + DeserializeOwned + Default,
{
    fn read(&self) -> Result<S, StorageError> {
        let conn = self.db.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE name = ?1",
                params![self.name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(self.decode(body))
    }

    fn update(&self, f: &mut dyn FnMut(&mut S)) -> Result<(), StorageError> {
        let mut conn = self.db.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let body: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE name = ?1",
                params![self.name],
                |row| row.get(0),
            )
            .optional()?;

        let mut state = self.decode(body);
        f(&mut state);
        let body = serde_json::to_string(&state)?;

        tx.execute(
            "INSERT INTO documents (name, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![self.name, body, current_timestamp()],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn is_writable(&self) -> bool {
        match self.db.conn.lock() {
            // Taking the write lock is the only reliable probe
            Ok(conn) => conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;").is_ok(),
            Err(_) => false,
        }
    }

    fn describe(&self) -> String {
        self.describe_location()
    }
}

/// Get current Unix timestamp
fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
