//! Content-addressed blob storage.
//!
//! Writes go through a [`BlobStore`]; reads go through one or more
//! [`Gateway`]s onto the same content.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{BackendError, BackendResult};

/// A read path onto the blob store.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Fetch the bytes stored under `content_id`.
    async fn fetch(&self, content_id: &str) -> BackendResult<Bytes>;
}

/// The write side of the blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its content id. `name` is advisory.
    async fn put(&self, data: Bytes, name: &str) -> BackendResult<String>;
}

type Blobs = Arc<RwLock<HashMap<String, Bytes>>>;

fn poisoned<E: std::fmt::Display>(e: E) -> BackendError {
    BackendError::Unavailable(format!("lock poisoned: {}", e))
}

/// In-memory content-addressed store. Content ids are blake3 hex digests.
#[derive(Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Blobs,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The content id `data` would be stored under.
    pub fn content_id_for(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }

    /// A new gateway reading from this store.
    pub fn gateway(&self, name: impl Into<String>) -> MemoryGateway {
        MemoryGateway {
            name: name.into(),
            blobs: self.blobs.clone(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Overwrite the bytes under an existing id, bypassing content
    /// addressing. Lets tests model a corrupted or malicious store.
    pub fn replace(&self, content_id: &str, data: Bytes) -> BackendResult<()> {
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        match blobs.get_mut(content_id) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(BackendError::NotFound(content_id.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes, name: &str) -> BackendResult<String> {
        let content_id = Self::content_id_for(&data);
        let size = data.len();
        self.blobs
            .write()
            .map_err(poisoned)?
            .insert(content_id.clone(), data);

        debug!(%content_id, name, size, "blob stored");
        Ok(content_id)
    }
}

/// Gateway onto a [`MemoryBlobStore`] with injectable outage and latency.
pub struct MemoryGateway {
    name: String,
    blobs: Blobs,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryGateway {
    /// Simulate the gateway going down (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, content_id: &str) -> BackendResult<Bytes> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!("gateway {} is down", self.name)));
        }

        let blobs = self.blobs.read().map_err(poisoned)?;
        blobs
            .get(content_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(content_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_content_addressed() {
        let store = MemoryBlobStore::new();
        let a = store.put(Bytes::from_static(b"x"), "a.bin").await.unwrap();
        let b = store.put(Bytes::from_static(b"x"), "b.bin").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, MemoryBlobStore::content_id_for(b"x"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_reads_store() {
        let store = MemoryBlobStore::new();
        let gateway = store.gateway("local");
        let id = store.put(Bytes::from_static(b"blob"), "blob").await.unwrap();

        assert_eq!(gateway.fetch(&id).await.unwrap(), Bytes::from_static(b"blob"));
        assert_eq!(
            gateway.fetch("missing").await.unwrap_err(),
            BackendError::NotFound("missing".into())
        );
    }

    #[tokio::test]
    async fn test_gateway_outage() {
        let store = MemoryBlobStore::new();
        let gateway = store.gateway("flaky");
        let id = store.put(Bytes::from_static(b"blob"), "blob").await.unwrap();

        gateway.set_available(false);
        assert!(matches!(gateway.fetch(&id).await, Err(BackendError::Unavailable(_))));
        gateway.set_available(true);
        assert!(gateway.fetch(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_replace_requires_existing() {
        let store = MemoryBlobStore::new();
        let id = store.put(Bytes::from_static(b"a"), "a").await.unwrap();
        store.replace(&id, Bytes::from_static(b"b")).unwrap();
        assert_eq!(store.gateway("g").fetch(&id).await.unwrap(), Bytes::from_static(b"b"));
        assert!(store.replace("nope", Bytes::new()).is_err());
    }
}
