//! Versioned, path-namespaced secret storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{BackendError, BackendResult};

/// A secret is a flat string map, like a KV-v2 secret's `data`.
pub type SecretData = BTreeMap<String, String>;

/// Secret store interface.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Write a new version at `path`. Returns the version number (from 1).
    async fn put(&self, path: &str, data: SecretData) -> BackendResult<u32>;

    /// Latest version at `path`, or `None` if nothing was ever written.
    async fn get(&self, path: &str) -> BackendResult<Option<SecretData>>;

    /// A specific version.
    async fn get_version(&self, path: &str, version: u32) -> BackendResult<Option<SecretData>>;
}

/// In-memory secret store that keeps every version.
pub struct MemorySecretStore {
    versions: RwLock<HashMap<String, Vec<SecretData>>>,
    available: AtomicBool,
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> BackendResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("secret store is down".into()))
        }
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> BackendError {
    BackendError::Unavailable(format!("lock poisoned: {}", e))
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn put(&self, path: &str, data: SecretData) -> BackendResult<u32> {
        self.check_available()?;
        if path.trim().is_empty() {
            return Err(BackendError::InvalidInput("secret path must not be empty".into()));
        }

        let mut versions = self.versions.write().map_err(poisoned)?;
        let history = versions.entry(path.to_string()).or_default();
        history.push(data);
        Ok(history.len() as u32)
    }

    async fn get(&self, path: &str) -> BackendResult<Option<SecretData>> {
        self.check_available()?;
        let versions = self.versions.read().map_err(poisoned)?;
        Ok(versions.get(path).and_then(|h| h.last().cloned()))
    }

    async fn get_version(&self, path: &str, version: u32) -> BackendResult<Option<SecretData>> {
        self.check_available()?;
        if version == 0 {
            return Ok(None);
        }
        let versions = self.versions.read().map_err(poisoned)?;
        Ok(versions
            .get(path)
            .and_then(|h| h.get(version as usize - 1).cloned()))
    }
}
