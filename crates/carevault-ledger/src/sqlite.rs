//! SQLite implementation of the StateStore trait.
//!
//! Durable world state using rusqlite with bundled SQLite, wrapped in async
//! via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use carevault_core::now_secs;

use crate::error::StateError;
use crate::migration;
use crate::state::{StateResult, StateStore};

/// SQLite-backed world state.
///
/// Thread-safe via an internal Mutex; every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open a database file, creating and migrating it as needed.
    pub fn open(path: impl AsRef<Path>) -> StateResult<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> StateResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> StateResult<T>
    where
        F: FnOnce(&Connection) -> StateResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                StateError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| StateError::Task(e.to_string()))?
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_state(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        let key = key.as_bytes().to_vec();
        self.run(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM world_state WHERE state_key = ?1",
                    params![key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn put_state(&self, key: &str, value: &[u8]) -> StateResult<()> {
        let key = key.as_bytes().to_vec();
        let value = value.to_vec();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO world_state (state_key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(state_key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now_secs()],
            )?;
            Ok(())
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>> {
        let prefix = prefix.as_bytes().to_vec();
        self.run(move |conn| {
            let prefix_len = prefix.len() as i64;
            let mut stmt = conn.prepare(
                "SELECT state_key, value FROM world_state
                 WHERE substr(state_key, 1, ?2) = ?1
                 ORDER BY state_key",
            )?;
            let rows = stmt.query_map(params![prefix, prefix_len], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (key, value) = row?;
                let key = String::from_utf8(key)
                    .map_err(|e| StateError::InvalidData(format!("non-UTF-8 state key: {}", e)))?;
                out.push((key, value));
            }
            Ok(out)
        })
        .await
    }
}
