//! World-state store: the key-value layer underneath the consent contract.
//!
//! The contract only needs point reads, point writes and ordered prefix scans
//! over composite keys (see [`crate::keys`]). Implementations include SQLite
//! (durable) and in-memory (tests and ephemeral deployments).

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StateError;

/// Result type for state operations.
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Async key-value interface for ledger world state.
#[async_trait]
pub trait StateStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Point Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Read the value stored under `key`.
    async fn get_state(&self, key: &str) -> StateResult<Option<Vec<u8>>>;

    /// Write (or overwrite) the value stored under `key`.
    async fn put_state(&self, key: &str, value: &[u8]) -> StateResult<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Range Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// All entries whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>>;
}

/// JSON helpers layered over [`StateStore`].
pub trait StateStoreExt: StateStore {
    /// Read and decode a JSON document.
    fn get_json<T>(&self, key: &str) -> impl Future<Output = StateResult<Option<T>>> + Send
    where
        T: DeserializeOwned + Send;

    /// Encode and write a JSON document.
    fn put_json<T>(&self, key: &str, value: &T) -> impl Future<Output = StateResult<()>> + Send
    where
        T: Serialize + Sync;

    /// Decode every document under a prefix, in key order.
    fn scan_json<T>(&self, prefix: &str) -> impl Future<Output = StateResult<Vec<T>>> + Send
    where
        T: DeserializeOwned + Send;
}

impl<S: StateStore + ?Sized> StateStoreExt for S {
    async fn get_json<T>(&self, key: &str) -> StateResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_state(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T>(&self, key: &str, value: &T) -> StateResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.put_state(key, &bytes).await
    }

    async fn scan_json<T>(&self, prefix: &str) -> StateResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.scan_prefix(prefix)
            .await?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(StateError::from))
            .collect()
    }
}
