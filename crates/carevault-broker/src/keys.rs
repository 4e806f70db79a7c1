//! Key material: where it lives, how it is provisioned, how a caller's
//! decryption key is resolved.
//!
//! Three kinds of record sit in the secret store under a configurable
//! namespace:
//!
//! | Record | Path | Fields |
//! |---|---|---|
//! | owner key | `<ns>/keys/<resourceId>` | `key` |
//! | rekey | `<ns>/rekeys/<resourceId>/<orgId>` | `rekeyId`, `capsule`, `encryptedKey` |
//! | shared key | `<ns>/shared/<resourceId>/<orgId>` | `key` |
//!
//! All values are base64. A non-owner only ever obtains a key through a rekey
//! record (re-encryption round trip) or, when enabled, a shared-key record.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use carevault_core::{OrgId, SymmetricKey};

use crate::backend::{
    BackendError, BackendResult, DecryptRequest, EncryptRequest, ReencryptRequest,
    ReencryptionService, RekeyRequest, SecretData, SecretStore,
};
use crate::error::RetrievalError;

const FIELD_KEY: &str = "key";
const FIELD_REKEY_ID: &str = "rekeyId";
const FIELD_CAPSULE: &str = "capsule";
const FIELD_ENCRYPTED_KEY: &str = "encryptedKey";

/// Secret-store path layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPaths {
    namespace: String,
}

impl SecretPaths {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn owner_key(&self, resource_id: &str) -> String {
        format!("{}/keys/{}", self.namespace, resource_id)
    }

    pub fn rekey(&self, resource_id: &str, org_id: &OrgId) -> String {
        format!("{}/rekeys/{}/{}", self.namespace, resource_id, org_id)
    }

    pub fn shared_key(&self, resource_id: &str, org_id: &OrgId) -> String {
        format!("{}/shared/{}/{}", self.namespace, resource_id, org_id)
    }
}

/// Key resolution failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Neither a rekey record nor a shared key exists for the caller.
    #[error("no key material for {org_id} on {resource_id}")]
    NoKeyMaterial { resource_id: String, org_id: OrgId },

    /// The re-encryption round trip (or decoding its result) failed.
    #[error("key resolution failed: {0}")]
    ResolutionFailed(String),

    /// The secret store could not be read.
    #[error("key service unavailable: {0}")]
    Unavailable(String),
}

impl From<KeyError> for RetrievalError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Unavailable(msg) => RetrievalError::KeyServiceUnavailable(msg),
            other => RetrievalError::KeyResolutionFailed(other.to_string()),
        }
    }
}

/// Run a backend call under `limit`.
async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = BackendResult<T>>,
) -> BackendResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(BackendError::Timeout(limit.as_millis() as u64)))
}

fn decode_key(field: &str, encoded: &str) -> Result<SymmetricKey, KeyError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| KeyError::ResolutionFailed(format!("{} is not base64: {}", field, e)))?;
    SymmetricKey::from_slice(&bytes).map_err(|e| KeyError::ResolutionFailed(e.to_string()))
}

fn field<'a>(data: &'a SecretData, name: &str, path: &str) -> Result<&'a str, KeyError> {
    data.get(name)
        .map(String::as_str)
        .ok_or_else(|| KeyError::ResolutionFailed(format!("{} has no {} field", path, name)))
}

/// Reads key material and resolves a caller's key.
#[derive(Clone)]
pub struct KeyResolver {
    secrets: Arc<dyn SecretStore>,
    reencryption: Arc<dyn ReencryptionService>,
    paths: SecretPaths,
    key_timeout: Duration,
    allow_shared_key_fallback: bool,
}

impl KeyResolver {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        reencryption: Arc<dyn ReencryptionService>,
        paths: SecretPaths,
        key_timeout: Duration,
        allow_shared_key_fallback: bool,
    ) -> Self {
        Self {
            secrets,
            reencryption,
            paths,
            key_timeout,
            allow_shared_key_fallback,
        }
    }

    pub fn paths(&self) -> &SecretPaths {
        &self.paths
    }

    /// The owner's key record for a resource.
    ///
    /// Missing, unreadable and undecodable records all report
    /// [`KeyError::Unavailable`].
    pub async fn owner_key(&self, resource_id: &str) -> Result<SymmetricKey, KeyError> {
        let path = self.paths.owner_key(resource_id);
        let data = bounded(self.key_timeout, self.secrets.get(&path))
            .await
            .map_err(|e| KeyError::Unavailable(e.to_string()))?
            .ok_or_else(|| KeyError::Unavailable(format!("no key record at {}", path)))?;

        let encoded = data
            .get(FIELD_KEY)
            .ok_or_else(|| KeyError::Unavailable(format!("key record at {} is malformed", path)))?;
        SymmetricKey::from_base64(encoded)
            .map_err(|_| KeyError::Unavailable(format!("key record at {} is malformed", path)))
    }

    /// Resolve the key `caller` uses to decrypt `resource_id`.
    ///
    /// The owner gets `direct` back unchanged. Anyone else needs a rekey
    /// record, or a shared key when the fallback is enabled.
    pub async fn resolve_key(
        &self,
        resource_id: &str,
        caller: &OrgId,
        owner: &OrgId,
        direct: &SymmetricKey,
    ) -> Result<SymmetricKey, KeyError> {
        if caller == owner {
            return Ok(direct.clone());
        }

        let rekey_path = self.paths.rekey(resource_id, caller);
        let record = bounded(self.key_timeout, self.secrets.get(&rekey_path))
            .await
            .map_err(|e| KeyError::Unavailable(e.to_string()))?;

        if let Some(record) = record {
            return self.reencrypt_key(&rekey_path, &record, caller, owner).await;
        }

        if self.allow_shared_key_fallback {
            let shared_path = self.paths.shared_key(resource_id, caller);
            let shared = bounded(self.key_timeout, self.secrets.get(&shared_path))
                .await
                .map_err(|e| KeyError::Unavailable(e.to_string()))?;
            if let Some(shared) = shared {
                debug!(resource_id, org_id = %caller, "using directly shared key");
                return decode_key(FIELD_KEY, field(&shared, FIELD_KEY, &shared_path)?);
            }
        }

        Err(KeyError::NoKeyMaterial {
            resource_id: resource_id.to_string(),
            org_id: caller.clone(),
        })
    }

    async fn reencrypt_key(
        &self,
        path: &str,
        record: &SecretData,
        caller: &OrgId,
        owner: &OrgId,
    ) -> Result<SymmetricKey, KeyError> {
        let request = ReencryptRequest {
            rekey_id: field(record, FIELD_REKEY_ID, path)?.to_string(),
            capsule: field(record, FIELD_CAPSULE, path)?.to_string(),
            ciphertext: field(record, FIELD_ENCRYPTED_KEY, path)?.to_string(),
        };
        let rekey_id = request.rekey_id.clone();

        let transformed = bounded(self.key_timeout, self.reencryption.reencrypt(request))
            .await
            .map_err(|e| {
                warn!(%rekey_id, org_id = %caller, error = %e, "re-encryption failed");
                KeyError::ResolutionFailed(e.to_string())
            })?;

        let decrypted = bounded(
            self.key_timeout,
            self.reencryption.decrypt(DecryptRequest {
                recipient_id: caller.to_string(),
                owner_id: owner.to_string(),
                capsule: transformed.capsule,
                ciphertext: transformed.ciphertext,
                cfrags: transformed.cfrags,
            }),
        )
        .await
        .map_err(|e| {
            warn!(%rekey_id, org_id = %caller, error = %e, "re-encrypted key could not be opened");
            KeyError::ResolutionFailed(e.to_string())
        })?;

        debug!(%rekey_id, org_id = %caller, "key resolved via re-encryption");
        decode_key("plaintext", &decrypted.plaintext)
    }
}

/// A delegation written to the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub rekey_id: String,
    pub path: String,
    pub expiry: i64,
}

/// Writes key material.
#[derive(Clone)]
pub struct KeyProvisioner {
    secrets: Arc<dyn SecretStore>,
    reencryption: Arc<dyn ReencryptionService>,
    paths: SecretPaths,
    key_timeout: Duration,
}

impl KeyProvisioner {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        reencryption: Arc<dyn ReencryptionService>,
        paths: SecretPaths,
        key_timeout: Duration,
    ) -> Self {
        Self {
            secrets,
            reencryption,
            paths,
            key_timeout,
        }
    }

    /// Store the owner's content key. Returns the secret version.
    pub async fn store_owner_key(&self, resource_id: &str, key: &SymmetricKey) -> BackendResult<u32> {
        let path = self.paths.owner_key(resource_id);
        let mut data = SecretData::new();
        data.insert(FIELD_KEY.into(), key.to_base64());

        let version = bounded(self.key_timeout, self.secrets.put(&path, data)).await?;
        debug!(resource_id, version, "owner key stored");
        Ok(version)
    }

    /// Give `org_id` the content key as-is.
    pub async fn share_key_directly(
        &self,
        resource_id: &str,
        org_id: &OrgId,
        key: &SymmetricKey,
    ) -> BackendResult<u32> {
        let path = self.paths.shared_key(resource_id, org_id);
        let mut data = SecretData::new();
        data.insert(FIELD_KEY.into(), key.to_base64());

        let version = bounded(self.key_timeout, self.secrets.put(&path, data)).await?;
        info!(resource_id, %org_id, "content key shared directly");
        Ok(version)
    }

    /// Delegate `key` from `owner` to `recipient` through the re-encryption
    /// service until `expiry`.
    ///
    /// Registers both parties, creates the rekey, encrypts the key to the
    /// owner and stores the resulting rekey record.
    pub async fn delegate_via_reencryption(
        &self,
        resource_id: &str,
        owner: &OrgId,
        recipient: &OrgId,
        key: &SymmetricKey,
        expiry: i64,
    ) -> BackendResult<Delegation> {
        bounded(self.key_timeout, self.reencryption.prepare(owner.as_str())).await?;
        bounded(self.key_timeout, self.reencryption.prepare(recipient.as_str())).await?;

        let rekey = bounded(
            self.key_timeout,
            self.reencryption.rekey(RekeyRequest {
                owner_id: owner.to_string(),
                recipient_id: recipient.to_string(),
                resource_id: resource_id.to_string(),
                expiry,
                threshold: 1,
                shares: 1,
            }),
        )
        .await?;

        let encrypted = bounded(
            self.key_timeout,
            self.reencryption.encrypt(EncryptRequest {
                owner_id: owner.to_string(),
                plaintext: BASE64.encode(key.as_bytes()),
            }),
        )
        .await?;

        let path = self.paths.rekey(resource_id, recipient);
        let mut data = SecretData::new();
        data.insert(FIELD_REKEY_ID.into(), rekey.rekey_id.clone());
        data.insert(FIELD_CAPSULE.into(), encrypted.capsule);
        data.insert(FIELD_ENCRYPTED_KEY.into(), encrypted.ciphertext);
        bounded(self.key_timeout, self.secrets.put(&path, data)).await?;

        info!(resource_id, %owner, %recipient, rekey_id = %rekey.rekey_id, expiry, "key delegated");
        Ok(Delegation {
            rekey_id: rekey.rekey_id,
            path,
            expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryReencryptionService, MemorySecretStore};
    use carevault_core::now_secs;

    struct Fixture {
        secrets: Arc<MemorySecretStore>,
        reencryption: Arc<MemoryReencryptionService>,
        resolver: KeyResolver,
        provisioner: KeyProvisioner,
    }

    fn fixture(allow_shared: bool) -> Fixture {
        let secrets = Arc::new(MemorySecretStore::new());
        let reencryption = Arc::new(MemoryReencryptionService::new());
        let paths = SecretPaths::new("cv/");
        let timeout = Duration::from_secs(5);
        Fixture {
            resolver: KeyResolver::new(
                secrets.clone(),
                reencryption.clone(),
                paths.clone(),
                timeout,
                allow_shared,
            ),
            provisioner: KeyProvisioner::new(secrets.clone(), reencryption.clone(), paths, timeout),
            secrets,
            reencryption,
        }
    }

    fn org(s: &str) -> OrgId {
        OrgId::parse(s).unwrap()
    }

    #[test]
    fn test_paths() {
        let paths = SecretPaths::new("carevault");
        let lab = org("Lab-001");
        assert_eq!(paths.owner_key("patient-001"), "carevault/keys/patient-001");
        assert_eq!(paths.rekey("patient-001", &lab), "carevault/rekeys/patient-001/lab-001");
        assert_eq!(paths.shared_key("patient-001", &lab), "carevault/shared/patient-001/lab-001");
        assert_eq!(SecretPaths::new("ns/").namespace(), "ns");
    }

    #[tokio::test]
    async fn test_owner_key_round_trip() {
        let f = fixture(true);
        let key = SymmetricKey::generate();
        f.provisioner.store_owner_key("r1", &key).await.unwrap();
        assert_eq!(f.resolver.owner_key("r1").await.unwrap(), key);

        assert!(matches!(f.resolver.owner_key("r2").await, Err(KeyError::Unavailable(_))));

        f.secrets.set_available(false);
        assert!(matches!(f.resolver.owner_key("r1").await, Err(KeyError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_owner_gets_direct_key() {
        let f = fixture(false);
        let key = SymmetricKey::generate();
        let hospital = org("hospital-001");
        let resolved = f.resolver.resolve_key("r1", &hospital, &hospital, &key).await.unwrap();
        assert_eq!(resolved, key);
    }

    #[tokio::test]
    async fn test_delegated_key_resolves() {
        let f = fixture(false);
        let key = SymmetricKey::generate();
        let (hospital, lab) = (org("hospital-001"), org("lab-001"));

        f.provisioner
            .delegate_via_reencryption("r1", &hospital, &lab, &key, now_secs() + 3600)
            .await
            .unwrap();

        let other = SymmetricKey::generate();
        let resolved = f.resolver.resolve_key("r1", &lab, &hospital, &other).await.unwrap();
        assert_eq!(resolved, key);
    }

    #[tokio::test]
    async fn test_shared_key_fallback_is_configurable() {
        let key = SymmetricKey::generate();
        let (hospital, lab) = (org("hospital-001"), org("lab-001"));

        let on = fixture(true);
        on.provisioner.share_key_directly("r1", &lab, &key).await.unwrap();
        assert_eq!(on.resolver.resolve_key("r1", &lab, &hospital, &key).await.unwrap(), key);

        let off = fixture(false);
        off.provisioner.share_key_directly("r1", &lab, &key).await.unwrap();
        assert!(matches!(
            off.resolver.resolve_key("r1", &lab, &hospital, &key).await,
            Err(KeyError::NoKeyMaterial { .. })
        ));
    }

    #[tokio::test]
    async fn test_reencryption_failure_never_yields_key() {
        let f = fixture(true);
        let key = SymmetricKey::generate();
        let (hospital, lab) = (org("hospital-001"), org("lab-001"));

        f.provisioner
            .delegate_via_reencryption("r1", &hospital, &lab, &key, now_secs() + 3600)
            .await
            .unwrap();
        // A shared key also exists, but a rekey record takes precedence.
        f.provisioner.share_key_directly("r1", &lab, &key).await.unwrap();

        f.reencryption.set_available(false);
        let err = f.resolver.resolve_key("r1", &lab, &hospital, &key).await.unwrap_err();
        assert!(matches!(err, KeyError::ResolutionFailed(_)));
        assert!(matches!(RetrievalError::from(err), RetrievalError::KeyResolutionFailed(_)));
    }
}
