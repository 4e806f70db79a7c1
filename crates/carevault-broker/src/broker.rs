//! The broker facade.
//!
//! [`Broker`] wires the ledger, backends, override layer, key handling,
//! retrieval pipeline and audit worker together and exposes the operations
//! the HTTP surface calls.

use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use carevault_core::{hash_hex, now_secs, OrgId, ResourceId, SymmetricKey};
use carevault_ledger::{
    open_local, AccessDecision, AccessGrant, ConsentClient, LedgerClient, NewResource, Organization, Resource,
};

use crate::audit::{AuditHandle, AuditStats, AuditWorker};
use crate::backend::{
    BlobStore, Gateway, GatewayRace, MemoryBlobStore, MemoryGateway, MemoryReencryptionService,
    MemorySecretStore, ReencryptionService, SecretStore,
};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result, RetrievalError};
use crate::keys::{Delegation, KeyProvisioner, KeyResolver, SecretPaths};
use crate::overrides::{
    AttackType, MemoryOverrideStore, OverrideLayer, OverrideStatus, OverrideStore, RevocationOutcome,
};
use crate::pipeline::{DecryptedResource, ResourceProbe, RetrievalPipeline};

/// The collaborators a broker runs against.
#[derive(Clone)]
pub struct BrokerBackends {
    pub ledger: Arc<dyn LedgerClient>,
    pub blob_store: Arc<dyn BlobStore>,
    /// Read gateways in preference order; the first is the primary.
    pub gateways: Vec<Arc<dyn Gateway>>,
    pub secrets: Arc<dyn SecretStore>,
    pub reencryption: Arc<dyn ReencryptionService>,
    pub overrides: Arc<dyn OverrideStore>,
}

/// In-process backends with their concrete handles kept for failure
/// injection.
#[derive(Clone)]
pub struct InMemoryBackends {
    pub blob_store: MemoryBlobStore,
    pub primary: Arc<MemoryGateway>,
    pub fallback: Arc<MemoryGateway>,
    pub secrets: Arc<MemorySecretStore>,
    pub reencryption: Arc<MemoryReencryptionService>,
    pub overrides: Arc<MemoryOverrideStore>,
}

impl Default for InMemoryBackends {
    fn default() -> Self {
        Self::with_reencryption(MemoryReencryptionService::new())
    }
}

impl InMemoryBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific re-encryption service (for example one with a fixed
    /// clock).
    pub fn with_reencryption(reencryption: MemoryReencryptionService) -> Self {
        let blob_store = MemoryBlobStore::new();
        Self {
            primary: Arc::new(blob_store.gateway("primary")),
            fallback: Arc::new(blob_store.gateway("fallback")),
            blob_store,
            secrets: Arc::new(MemorySecretStore::new()),
            reencryption: Arc::new(reencryption),
            overrides: Arc::new(MemoryOverrideStore::new()),
        }
    }

    /// Bundle these with a ledger.
    pub fn backends(&self, ledger: Arc<dyn LedgerClient>) -> BrokerBackends {
        BrokerBackends {
            ledger,
            blob_store: Arc::new(self.blob_store.clone()),
            gateways: vec![
                self.primary.clone() as Arc<dyn Gateway>,
                self.fallback.clone() as Arc<dyn Gateway>,
            ],
            secrets: self.secrets.clone(),
            reencryption: self.reencryption.clone(),
            overrides: self.overrides.clone(),
        }
    }
}

impl BrokerBackends {
    /// Everything in process, with the ledger chosen by `config.ledger`.
    pub fn in_memory(config: &BrokerConfig) -> Result<Self> {
        let ledger = open_local(&config.ledger)?;
        Ok(InMemoryBackends::new().backends(ledger))
    }
}

/// How a grantee receives the content key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDelivery {
    /// Through a rekey record, expiring with the grant.
    #[default]
    Reencryption,
    /// As a directly shared key record.
    Direct,
    /// Ledger grant only.
    None,
}

impl FromStr for KeyDelivery {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reencryption" => Ok(KeyDelivery::Reencryption),
            "direct" => Ok(KeyDelivery::Direct),
            "none" => Ok(KeyDelivery::None),
            _ => Err(BrokerError::Validation(format!("invalid keyDelivery: {}", s))),
        }
    }
}

/// Input to [`Broker::upload`].
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub resource_id: String,
    pub owner_org_id: String,
    pub resource_type: String,
    pub data: Bytes,
}

/// What an upload produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub resource: Resource,
    pub tx_id: String,
    pub key_version: u32,
}

/// Input to [`Broker::grant_access`].
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub resource_id: String,
    pub grantee_org_id: String,
    pub access_type: String,
    pub expiry_timestamp: i64,
    pub key_delivery: KeyDelivery,
}

/// What a grant produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantReceipt {
    pub grant: AccessGrant,
    pub tx_id: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation: Option<Delegation>,
}

/// Ledger transaction summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt<T> {
    pub tx_id: String,
    pub timestamp: i64,
    pub result: T,
}

/// The access broker.
#[derive(Clone)]
pub struct Broker {
    config: Arc<BrokerConfig>,
    ledger: ConsentClient,
    blob_store: Arc<dyn BlobStore>,
    resolver: KeyResolver,
    provisioner: KeyProvisioner,
    overrides: OverrideLayer,
    pipeline: RetrievalPipeline,
    audit: AuditHandle,
}

fn org_id(raw: &str) -> Result<OrgId> {
    OrgId::parse(raw).map_err(|e| BrokerError::Validation(e.to_string()))
}

fn resource_id(raw: &str) -> Result<ResourceId> {
    ResourceId::parse(raw).map_err(|e| BrokerError::Validation(e.to_string()))
}

impl Broker {
    /// Wire a broker. Spawns the audit worker, so this must run inside a
    /// tokio runtime.
    pub fn new(config: BrokerConfig, backends: BrokerBackends) -> Self {
        let ledger = ConsentClient::new(backends.ledger);
        let paths = SecretPaths::new(config.namespace.clone());

        let resolver = KeyResolver::new(
            backends.secrets.clone(),
            backends.reencryption.clone(),
            paths.clone(),
            config.key_timeout,
            config.allow_shared_key_fallback,
        );
        let provisioner = KeyProvisioner::new(
            backends.secrets,
            backends.reencryption,
            paths,
            config.key_timeout,
        );
        let overrides = OverrideLayer::new(backends.overrides, ledger.clone(), config.ledger_timeout);
        let (audit, _worker) = AuditWorker::spawn(ledger.clone(), &config.audit, config.ledger_timeout);

        let pipeline = RetrievalPipeline::new(
            ledger.clone(),
            GatewayRace::new(backends.gateways, config.gateway.clone()),
            resolver.clone(),
            overrides.clone(),
            audit.clone(),
            config.ledger_timeout,
        );

        info!(namespace = %config.namespace, "broker ready");
        Self {
            config: Arc::new(config),
            ledger,
            blob_store: backends.blob_store,
            resolver,
            provisioner,
            overrides,
            pipeline,
            audit,
        }
    }

    /// A broker over fresh in-process backends.
    pub fn in_memory(config: BrokerConfig) -> Result<Self> {
        let backends = BrokerBackends::in_memory(&config)?;
        Ok(Self::new(config, backends))
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Typed ledger access.
    pub fn ledger(&self) -> &ConsentClient {
        &self.ledger
    }

    pub fn audit_stats(&self) -> AuditStats {
        self.audit.stats()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Provisioning
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn register_org(&self, org_id: &str, metadata: Value) -> Result<TxReceipt<Organization>> {
        let submitted = self.ledger.register_org(org_id, &metadata).await?;
        Ok(TxReceipt {
            tx_id: submitted.tx_id,
            timestamp: submitted.timestamp,
            result: submitted.result,
        })
    }

    /// Encrypt under a fresh content key, store the envelope and the owner
    /// key, then record the metadata on the ledger.
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt> {
        let resource_id = resource_id(&request.resource_id)?;
        let owner = org_id(&request.owner_org_id)?;
        if request.resource_type.trim().is_empty() {
            return Err(BrokerError::Validation("resourceType must not be empty".into()));
        }

        let key = SymmetricKey::generate();
        let envelope = Bytes::from(key.encrypt(&request.data, None)?.to_envelope());
        let content_hash = hash_hex(&envelope);
        let content_id = self.blob_store.put(envelope, resource_id.as_str()).await?;
        let key_version = self.provisioner.store_owner_key(resource_id.as_str(), &key).await?;

        let submitted = self
            .ledger
            .upload_meta(NewResource {
                resource_id: resource_id.as_str(),
                owner_org_id: owner.as_str(),
                content_id: &content_id,
                content_hash: &content_hash,
                resource_type: request.resource_type.trim(),
            })
            .await?;

        info!(%resource_id, %owner, %content_id, "resource uploaded");
        Ok(UploadReceipt {
            resource: submitted.result,
            tx_id: submitted.tx_id,
            key_version,
        })
    }

    /// Record a grant and deliver the content key as requested.
    ///
    /// Delivery inputs are checked before the ledger write. If delivery still
    /// fails afterwards the grant is revoked again, so a failed call never
    /// leaves an active grant without key material behind it.
    pub async fn grant_access(&self, request: GrantRequest) -> Result<GrantReceipt> {
        let rid = resource_id(&request.resource_id)?;
        let grantee = org_id(&request.grantee_org_id)?;
        match request.key_delivery {
            KeyDelivery::Reencryption if request.expiry_timestamp <= now_secs() => {
                return Err(BrokerError::Validation("rekey expiry must be in the future".into()));
            }
            KeyDelivery::Reencryption | KeyDelivery::Direct => {
                self.ledger.query_resource(rid.as_str()).await?;
                self.owner_key(rid.as_str()).await?;
            }
            KeyDelivery::None => {}
        }

        let submitted = self
            .ledger
            .grant_access(
                rid.as_str(),
                grantee.as_str(),
                &request.access_type,
                request.expiry_timestamp,
            )
            .await?;

        let delivered = match request.key_delivery {
            KeyDelivery::Reencryption => self
                .delegate(rid.as_str(), grantee.as_str(), Some(request.expiry_timestamp))
                .await
                .map(Some),
            KeyDelivery::Direct => self.share_key(rid.as_str(), grantee.as_str()).await.map(|_| None),
            KeyDelivery::None => Ok(None),
        };
        let delegation = match delivered {
            Ok(delegation) => delegation,
            Err(e) => {
                warn!(resource_id = %rid, %grantee, error = %e, "key delivery failed, revoking grant");
                if let Err(rollback) = self.ledger.revoke_access(rid.as_str(), grantee.as_str()).await {
                    warn!(resource_id = %rid, %grantee, error = %rollback, "grant rollback failed");
                }
                return Err(e);
            }
        };

        Ok(GrantReceipt {
            grant: submitted.result,
            tx_id: submitted.tx_id,
            timestamp: submitted.timestamp,
            delegation,
        })
    }

    pub async fn revoke_access(&self, resource_id: &str, grantee_org_id: &str) -> Result<TxReceipt<AccessGrant>> {
        let submitted = self.ledger.revoke_access(resource_id, grantee_org_id).await?;
        Ok(TxReceipt {
            tx_id: submitted.tx_id,
            timestamp: submitted.timestamp,
            result: submitted.result,
        })
    }

    /// Delegate the owner's content key to `recipient` via re-encryption.
    /// Without an expiry the rekey lives for the configured TTL.
    pub async fn delegate(&self, resource_id_raw: &str, recipient: &str, expiry: Option<i64>) -> Result<Delegation> {
        let rid = resource_id(resource_id_raw)?;
        let recipient = org_id(recipient)?;
        let resource = self.ledger.query_resource(rid.as_str()).await?;
        let key = self.owner_key(rid.as_str()).await?;
        let expiry = expiry.unwrap_or_else(|| now_secs() + self.config.rekey_ttl_secs);

        let delegation = self
            .provisioner
            .delegate_via_reencryption(rid.as_str(), &resource.owner_org_id, &recipient, &key, expiry)
            .await?;
        Ok(delegation)
    }

    /// Share the owner's content key with `org_id` as-is.
    pub async fn share_key(&self, resource_id_raw: &str, org_id_raw: &str) -> Result<u32> {
        let rid = resource_id(resource_id_raw)?;
        let org = org_id(org_id_raw)?;
        self.ledger.query_resource(rid.as_str()).await?;
        let key = self.owner_key(rid.as_str()).await?;
        Ok(self.provisioner.share_key_directly(rid.as_str(), &org, &key).await?)
    }

    async fn owner_key(&self, resource_id: &str) -> Result<SymmetricKey> {
        Ok(self.resolver.owner_key(resource_id).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retrieval
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn retrieve(&self, resource_id: &str, caller: &str) -> std::result::Result<DecryptedResource, RetrievalError> {
        self.pipeline.retrieve(resource_id, caller).await
    }

    pub async fn probe(&self, resource_id: &str, caller: &str) -> std::result::Result<ResourceProbe, RetrievalError> {
        self.pipeline.probe(resource_id, caller).await
    }

    /// The full access decision for `caller`, override included.
    pub async fn check_access(&self, resource_id: &str, caller: &str) -> std::result::Result<AccessDecision, RetrievalError> {
        self.pipeline.check_access(resource_id, caller).await
    }

    /// The key `caller` would decrypt `resource_id` with, resolved exactly
    /// as retrieval does it but without the access check.
    pub async fn resolve_key(&self, resource_id: &str, caller: &str) -> std::result::Result<SymmetricKey, RetrievalError> {
        let caller = OrgId::parse(caller).map_err(|e| RetrievalError::ValidationError(e.to_string()))?;
        let resource_id = ResourceId::parse(resource_id).map_err(|e| RetrievalError::ValidationError(e.to_string()))?;
        let resource = self
            .ledger
            .query_resource(resource_id.as_str())
            .await
            .map_err(RetrievalError::from_ledger)?;
        let direct = self.resolver.owner_key(resource_id.as_str()).await?;
        Ok(self
            .resolver
            .resolve_key(resource_id.as_str(), &caller, &resource.owner_org_id, &direct)
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Revocation
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn revoke_org(&self, org_id: &str, reason: Option<&str>) -> Result<RevocationOutcome> {
        self.overrides.revoke_org_override(org_id, reason).await
    }

    pub async fn reinstate_org(&self, org_id: &str) -> Result<RevocationOutcome> {
        self.overrides.reinstate(org_id).await
    }

    pub fn set_override(&self, org_id: &str, active: bool, attack_type: AttackType) -> Result<OverrideStatus> {
        self.overrides.set_override(org_id, active, attack_type)
    }

    pub fn clear_overrides(&self) -> usize {
        self.overrides.clear_all()
    }

    pub fn override_status(&self) -> Vec<OverrideStatus> {
        self.overrides.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn broker() -> Broker {
        let broker = Broker::in_memory(BrokerConfig::default()).unwrap();
        broker.register_org("hospital-001", json!({"name": "General"})).await.unwrap();
        broker.register_org("lab-001", json!({"name": "Lab"})).await.unwrap();
        broker
    }

    fn upload(resource_id: &str, data: &'static [u8]) -> UploadRequest {
        UploadRequest {
            resource_id: resource_id.into(),
            owner_org_id: "hospital-001".into(),
            resource_type: "fhir-json".into(),
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn test_key_delivery_parse() {
        assert_eq!("Direct".parse::<KeyDelivery>().unwrap(), KeyDelivery::Direct);
        assert!("carrier-pigeon".parse::<KeyDelivery>().is_err());
        assert_eq!(KeyDelivery::default(), KeyDelivery::Reencryption);
    }

    #[tokio::test]
    async fn test_upload_records_hash_of_envelope() {
        let broker = broker().await;
        let receipt = broker.upload(upload("patient-001", b"{}")).await.unwrap();

        assert_eq!(receipt.resource.owner_org_id.as_str(), "hospital-001");
        assert_eq!(receipt.resource.content_hash.len(), 64);
        assert_eq!(receipt.key_version, 1);

        let out = broker.retrieve("patient-001", "hospital-001").await.unwrap();
        assert_eq!(&out.data[..], b"{}");
        assert_eq!(out.content_type, "application/fhir+json");
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let broker = broker().await;
        let mut bad = upload("patient-001", b"x");
        bad.resource_type = " ".into();
        assert!(matches!(broker.upload(bad).await, Err(BrokerError::Validation(_))));

        let mut unknown_owner = upload("patient-002", b"x");
        unknown_owner.owner_org_id = "nobody".into();
        assert!(matches!(broker.upload(unknown_owner).await, Err(BrokerError::Ledger(_))));
    }

    #[tokio::test]
    async fn test_grant_delivers_key_by_reencryption() {
        let broker = broker().await;
        broker.upload(upload("patient-001", b"record")).await.unwrap();

        let receipt = broker
            .grant_access(GrantRequest {
                resource_id: "patient-001".into(),
                grantee_org_id: "LAB-001".into(),
                access_type: "read".into(),
                expiry_timestamp: now_secs() + 3600,
                key_delivery: KeyDelivery::Reencryption,
            })
            .await
            .unwrap();
        assert!(receipt.delegation.is_some());

        let owner_key = broker.owner_key("patient-001").await.unwrap();
        let lab_key = broker.resolve_key("patient-001", "lab-001").await.unwrap();
        assert_eq!(lab_key, owner_key);
    }

    #[tokio::test]
    async fn test_resolve_key_without_material() {
        let broker = broker().await;
        broker.upload(upload("patient-001", b"record")).await.unwrap();
        assert!(matches!(
            broker.resolve_key("patient-001", "lab-001").await,
            Err(RetrievalError::KeyResolutionFailed(_))
        ));
    }
}
