//! The resource retrieval pipeline.
//!
//! `retrieve` runs access check, metadata fetch, blob fetch, integrity check,
//! owner-key fetch, key resolution, decryption, and then queues an audit
//! entry. Each stage either hands its output to the next or ends the request
//! with one [`RetrievalError`]; nothing is retried past the gateway race.

use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use carevault_core::{hash_hex, now_secs, unpack_envelope, OrgId, ResourceId, SymmetricKey};
use carevault_ledger::{AccessDecision, ConsentClient, DenialReason, Resource, ACTION_DENIED};

use crate::audit::{AuditEvent, AuditHandle};
use crate::backend::{BackendError, GatewayRace, SizeClass};
use crate::error::RetrievalError;
use crate::keys::KeyResolver;
use crate::overrides::OverrideLayer;

/// Audit action for a successful retrieval.
pub const ACTION_RETRIEVE: &str = "retrieve";

/// A decrypted resource ready to hand back.
#[derive(Debug, Clone)]
pub struct DecryptedResource {
    pub resource_id: String,
    pub resource_type: String,
    pub content_type: &'static str,
    pub data: Bytes,
    pub elapsed_ms: u64,
}

/// Metadata plus the access decision, without touching content.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceProbe {
    pub resource: Resource,
    pub decision: AccessDecision,
}

/// MIME type for a resource type tag.
pub fn content_type_for(resource_type: &str) -> &'static str {
    let t = resource_type.to_ascii_lowercase();
    if t.contains("json") || t.contains("fhir") {
        "application/fhir+json"
    } else if t.contains("pdf") {
        "application/pdf"
    } else if t.contains("dicom") || t.contains("imaging") {
        "application/dicom"
    } else if t.contains("text") || t.contains("note") {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Everything a retrieval touches.
#[derive(Clone)]
pub struct RetrievalPipeline {
    ledger: ConsentClient,
    gateways: GatewayRace,
    keys: KeyResolver,
    overrides: OverrideLayer,
    audit: AuditHandle,
    ledger_timeout: Duration,
}

impl RetrievalPipeline {
    pub fn new(
        ledger: ConsentClient,
        gateways: GatewayRace,
        keys: KeyResolver,
        overrides: OverrideLayer,
        audit: AuditHandle,
        ledger_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            gateways,
            keys,
            overrides,
            audit,
            ledger_timeout,
        }
    }

    /// Fetch, verify and decrypt `resource_id` for `caller`.
    pub async fn retrieve(&self, resource_id: &str, caller: &str) -> Result<DecryptedResource, RetrievalError> {
        let started = Instant::now();
        let (resource_id, caller) = parse_ids(resource_id, caller)?;
        let decision = self.authorize(&resource_id, &caller).await?;
        let resource = self.metadata(resource_id.as_str()).await?;

        let encrypted = self.fetch_blob(&resource).await?;
        verify_integrity(&resource, &encrypted)?;

        let owner_key = self
            .keys
            .owner_key(resource.resource_id.as_str())
            .await
            .map_err(|e| RetrievalError::KeyServiceUnavailable(e.to_string()))?;

        let key = self.resolve(&resource, &caller, &decision, owner_key).await?;
        let plaintext = decrypt_blob(&encrypted, &key).map_err(|e| {
            warn!(%resource_id, org_id = %caller, "decryption failed");
            e
        })?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.audit.record(AuditEvent {
            resource_id: resource.resource_id.to_string(),
            org_id: caller.clone(),
            action: ACTION_RETRIEVE.to_string(),
            timestamp: now_secs(),
        });

        info!(
            %resource_id,
            org_id = %caller,
            owner = decision.is_owner,
            size = plaintext.len(),
            elapsed_ms,
            "resource retrieved"
        );
        Ok(DecryptedResource {
            resource_id: resource.resource_id.to_string(),
            content_type: content_type_for(&resource.resource_type),
            resource_type: resource.resource_type,
            data: Bytes::from(plaintext),
            elapsed_ms,
        })
    }

    /// Metadata and decision only. A denial is still an error.
    pub async fn probe(&self, resource_id: &str, caller: &str) -> Result<ResourceProbe, RetrievalError> {
        let (resource_id, caller) = parse_ids(resource_id, caller)?;
        let decision = self.authorize(&resource_id, &caller).await?;
        let resource = self.metadata(resource_id.as_str()).await?;
        Ok(ResourceProbe { resource, decision })
    }

    /// The decision retrieval would act on, returned whole. A denial is a
    /// decision here, not an error, and is not audited.
    pub async fn check_access(&self, resource_id: &str, caller: &str) -> Result<AccessDecision, RetrievalError> {
        let (resource_id, caller) = parse_ids(resource_id, caller)?;
        self.decide(&resource_id, &caller).await
    }

    /// Ledger decision composed with the override.
    async fn decide(&self, resource_id: &ResourceId, caller: &OrgId) -> Result<AccessDecision, RetrievalError> {
        let check = self.ledger.check_access(resource_id.as_str(), caller.as_str());
        Ok(tokio::time::timeout(self.ledger_timeout, check)
            .await
            .map_err(|_| RetrievalError::LedgerUnavailable("checkAccess timed out".into()))?
            .map_err(RetrievalError::from_ledger)?
            .apply_override(self.overrides.is_revoked(caller)))
    }

    /// The access check. Denials are audited before they are returned.
    async fn authorize(&self, resource_id: &ResourceId, caller: &OrgId) -> Result<AccessDecision, RetrievalError> {
        let decision = self.decide(resource_id, caller).await?;

        if !decision.has_access {
            let reason = decision.reason.unwrap_or(DenialReason::NoGrant);
            info!(%resource_id, org_id = %caller, %reason, "access denied");
            self.audit.record(AuditEvent {
                resource_id: resource_id.to_string(),
                org_id: caller.clone(),
                action: ACTION_DENIED.to_string(),
                timestamp: now_secs(),
            });
            return Err(RetrievalError::forbidden(reason));
        }

        debug!(%resource_id, org_id = %caller, owner = decision.is_owner, "access granted");
        Ok(decision)
    }

    async fn metadata(&self, resource_id: &str) -> Result<Resource, RetrievalError> {
        let query = self.ledger.query_resource(resource_id);
        match tokio::time::timeout(self.ledger_timeout, query).await {
            Ok(Ok(resource)) => Ok(resource),
            Ok(Err(e)) if e.is_unavailable() => Err(RetrievalError::LedgerUnavailable(e.to_string())),
            Ok(Err(e)) => {
                debug!(resource_id, error = %e, "metadata missing or malformed");
                Err(RetrievalError::NotFound(resource_id.to_string()))
            }
            Err(_) => Err(RetrievalError::LedgerUnavailable("queryResource timed out".into())),
        }
    }

    async fn fetch_blob(&self, resource: &Resource) -> Result<Bytes, RetrievalError> {
        let size = SizeClass::for_resource_type(&resource.resource_type);
        self.gateways
            .fetch(&resource.content_id, size)
            .await
            .map_err(|e| match e {
                BackendError::Timeout(ms) => {
                    RetrievalError::StorageUnavailable(format!("blob fetch exceeded {} ms", ms))
                }
                other => RetrievalError::StorageUnavailable(other.to_string()),
            })
    }

    /// Non-owners only get a key through resolution; the owner's raw key is
    /// the last resort for a confirmed owner alone.
    async fn resolve(
        &self,
        resource: &Resource,
        caller: &OrgId,
        decision: &AccessDecision,
        owner_key: SymmetricKey,
    ) -> Result<SymmetricKey, RetrievalError> {
        let resource_id = resource.resource_id.as_str();
        match self
            .keys
            .resolve_key(resource_id, caller, &resource.owner_org_id, &owner_key)
            .await
        {
            Ok(key) => Ok(key),
            Err(_) if decision.is_owner => Ok(owner_key),
            Err(e) => {
                warn!(resource_id, org_id = %caller, error = %e, "key resolution failed");
                Err(RetrievalError::Forbidden("decryption key unavailable".into()))
            }
        }
    }
}

/// Ids arrive raw from callers; everything downstream sees the parsed form.
fn parse_ids(resource_id: &str, caller: &str) -> Result<(ResourceId, OrgId), RetrievalError> {
    let caller = OrgId::parse(caller).map_err(|e| RetrievalError::ValidationError(e.to_string()))?;
    let resource_id = ResourceId::parse(resource_id).map_err(|e| RetrievalError::ValidationError(e.to_string()))?;
    Ok((resource_id, caller))
}

fn verify_integrity(resource: &Resource, encrypted: &[u8]) -> Result<(), RetrievalError> {
    let actual = hash_hex(encrypted);
    if actual != resource.content_hash.to_ascii_lowercase() {
        warn!(
            resource_id = %resource.resource_id,
            expected = %resource.content_hash,
            %actual,
            "content hash mismatch"
        );
        return Err(RetrievalError::IntegrityFailure(resource.resource_id.to_string()));
    }
    Ok(())
}

fn decrypt_blob(encrypted: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, RetrievalError> {
    let (iv, tag, ciphertext) = unpack_envelope(encrypted).map_err(|_| RetrievalError::DecryptionFailed)?;
    carevault_core::decrypt(&ciphertext, key.as_bytes(), iv.as_bytes(), tag.as_bytes(), None)
        .map_err(|_| RetrievalError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("fhir-json"), "application/fhir+json");
        assert_eq!(content_type_for("Lab-Report-PDF"), "application/pdf");
        assert_eq!(content_type_for("dicom"), "application/dicom");
        assert_eq!(content_type_for("imaging-ct"), "application/dicom");
        assert_eq!(content_type_for("clinical-note"), "text/plain");
        assert_eq!(content_type_for("genome"), "application/octet-stream");
    }

    #[test]
    fn test_decrypt_blob_is_generic() {
        let key = SymmetricKey::generate();
        let envelope = key.encrypt(b"record", None).unwrap().to_envelope();
        assert_eq!(decrypt_blob(&envelope, &key).unwrap(), b"record");

        let wrong = SymmetricKey::generate();
        assert_eq!(decrypt_blob(&envelope, &wrong), Err(RetrievalError::DecryptionFailed));
        assert_eq!(decrypt_blob(&envelope[..10], &key), Err(RetrievalError::DecryptionFailed));
    }
}
