//! The consent contract.
//!
//! All rules about organizations, resources, grants and the audit log live
//! here. The contract reads and writes world state through a [`StateStore`];
//! mutating calls take a [`TxContext`] that supplies the transaction id and
//! timestamp and collects the events the call emits.
//!
//! The contract does not serialize writers. Whoever drives it (see
//! [`LocalLedger`](crate::LocalLedger)) must ensure that two mutating calls
//! never interleave.

use std::sync::Arc;

use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info};

use carevault_core::{now_secs, OrgId, ResourceId};

use crate::decision::{decide, AccessDecision};
use crate::error::{ContractError, Result};
use crate::events::{EventType, LedgerEvent};
use crate::keys::{self, composite_key, AUDIT, RESOURCE};
use crate::model::{AccessGrant, AccessType, AuditLogEntry, Organization, Resource};
use crate::state::{StateStore, StateStoreExt};

/// Per-transaction context for mutating calls.
#[derive(Debug, Clone)]
pub struct TxContext {
    pub tx_id: String,

    /// Transaction timestamp, epoch seconds.
    pub timestamp: i64,

    events: Vec<LedgerEvent>,
}

impl TxContext {
    pub fn new(tx_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            tx_id: tx_id.into(),
            timestamp,
            events: Vec::new(),
        }
    }

    /// Fresh random transaction id (32 bytes, hex) stamped with the current time.
    pub fn generate() -> Self {
        let mut id = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut id);
        Self::new(hex::encode(id), now_secs())
    }

    /// Events emitted so far.
    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<LedgerEvent> {
        self.events
    }

    fn emit<T: Serialize>(&mut self, event_type: EventType, payload: &T) -> Result<()> {
        let payload = serde_json::to_value(payload)?;
        self.events.push(LedgerEvent::new(event_type, payload, &self.tx_id));
        Ok(())
    }
}

/// Fields for a new resource record.
#[derive(Debug, Clone, Default)]
pub struct NewResource<'a> {
    pub resource_id: &'a str,
    pub owner_org_id: &'a str,
    pub content_id: &'a str,
    pub content_hash: &'a str,
    pub resource_type: &'a str,
}

/// The consent contract over a world-state store.
pub struct ConsentContract<S: StateStore + ?Sized> {
    state: Arc<S>,
}

impl<S: StateStore + ?Sized> Clone for ConsentContract<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

fn require(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ContractError::Validation(format!("{} must not be empty", field)).into());
    }
    Ok(trimmed.to_string())
}

impl<S: StateStore + ?Sized> ConsentContract<S> {
    pub fn new(state: Arc<S>) -> Self {
        Self { state }
    }

    /// The underlying world state.
    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Organizations
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a new organization.
    pub async fn register_org(
        &self,
        tx: &mut TxContext,
        org_id: &str,
        metadata: serde_json::Value,
    ) -> Result<Organization> {
        let org_id = OrgId::parse(org_id).map_err(ContractError::from)?;
        let key = keys::org_key(org_id.as_str());

        if self.state.get_state(&key).await?.is_some() {
            return Err(ContractError::OrgExists(org_id.to_string()).into());
        }

        let org = Organization {
            org_id,
            metadata,
            registered_at: tx.timestamp,
            is_revoked: false,
            revocation_reason: None,
            revoked_at: None,
            reinstated_at: None,
        };
        self.state.put_json(&key, &org).await?;
        tx.emit(EventType::OrgRegistered, &org)?;

        info!(org_id = %org.org_id, tx_id = %tx.tx_id, "organization registered");
        Ok(org)
    }

    /// Mark an organization revoked, creating the record if it was never
    /// registered. Revoking twice updates the reason and time.
    pub async fn revoke_org(
        &self,
        tx: &mut TxContext,
        org_id: &str,
        reason: Option<&str>,
    ) -> Result<Organization> {
        let org_id = OrgId::parse(org_id).map_err(ContractError::from)?;
        let key = keys::org_key(org_id.as_str());
        let reason = reason.map(str::trim).filter(|r| !r.is_empty()).map(String::from);

        let org = match self.state.get_json::<Organization>(&key).await? {
            Some(mut org) => {
                org.is_revoked = true;
                org.revocation_reason = reason;
                org.revoked_at = Some(tx.timestamp);
                org
            }
            None => {
                debug!(org_id = %org_id, "revoking unregistered organization");
                Organization {
                    org_id,
                    metadata: serde_json::Value::Null,
                    registered_at: tx.timestamp,
                    is_revoked: true,
                    revocation_reason: reason,
                    revoked_at: Some(tx.timestamp),
                    reinstated_at: None,
                }
            }
        };

        self.state.put_json(&key, &org).await?;
        tx.emit(EventType::OrgRevoked, &org)?;

        info!(org_id = %org.org_id, tx_id = %tx.tx_id, "organization revoked");
        Ok(org)
    }

    /// Lift a revocation. Fails if the organization is unknown or not revoked.
    pub async fn reinstate_org(&self, tx: &mut TxContext, org_id: &str) -> Result<Organization> {
        let mut org = self.query_org(org_id).await?;
        if !org.is_revoked {
            return Err(ContractError::OrgNotRevoked(org.org_id.to_string()).into());
        }

        org.is_revoked = false;
        org.reinstated_at = Some(tx.timestamp);

        self.state
            .put_json(&keys::org_key(org.org_id.as_str()), &org)
            .await?;
        tx.emit(EventType::OrgReinstated, &org)?;

        info!(org_id = %org.org_id, tx_id = %tx.tx_id, "organization reinstated");
        Ok(org)
    }

    pub async fn query_org(&self, org_id: &str) -> Result<Organization> {
        let org_id = OrgId::parse(org_id).map_err(ContractError::from)?;
        self.state
            .get_json(&keys::org_key(org_id.as_str()))
            .await?
            .ok_or_else(|| ContractError::OrgNotFound(org_id.to_string()).into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resources
    // ─────────────────────────────────────────────────────────────────────────

    /// Record metadata for a new encrypted resource. The owner must exist.
    pub async fn upload_meta(&self, tx: &mut TxContext, new: NewResource<'_>) -> Result<Resource> {
        let resource_id = ResourceId::parse(new.resource_id).map_err(ContractError::from)?;
        let content_id = require(new.content_id, "contentId")?;
        let content_hash = require(new.content_hash, "contentHash")?.to_ascii_lowercase();
        let resource_type = require(new.resource_type, "resourceType")?;

        let owner = self.query_org(new.owner_org_id).await?;

        let key = keys::resource_key(resource_id.as_str());
        if self.state.get_state(&key).await?.is_some() {
            return Err(ContractError::ResourceExists(resource_id.to_string()).into());
        }

        let resource = Resource {
            resource_id,
            owner_org_id: owner.org_id,
            content_id,
            content_hash,
            resource_type,
            uploaded_at: tx.timestamp,
        };
        self.state.put_json(&key, &resource).await?;
        tx.emit(EventType::ResourceUploaded, &resource)?;

        info!(
            resource_id = %resource.resource_id,
            owner = %resource.owner_org_id,
            tx_id = %tx.tx_id,
            "resource metadata recorded"
        );
        Ok(resource)
    }

    pub async fn query_resource(&self, resource_id: &str) -> Result<Resource> {
        let resource_id = ResourceId::parse(resource_id).map_err(ContractError::from)?;
        self.state
            .get_json(&keys::resource_key(resource_id.as_str()))
            .await?
            .ok_or_else(|| ContractError::ResourceNotFound(resource_id.to_string()).into())
    }

    /// Every resource owned by `org_id`, in resource id order.
    pub async fn resources_by_owner(&self, org_id: &str) -> Result<Vec<Resource>> {
        let org_id = OrgId::parse(org_id).map_err(ContractError::from)?;
        let all: Vec<Resource> = self.state.scan_json(&composite_key(RESOURCE, &[])).await?;
        Ok(all.into_iter().filter(|r| r.owner_org_id == org_id).collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant (or re-grant) access. Re-granting overwrites and reactivates.
    pub async fn grant_access(
        &self,
        tx: &mut TxContext,
        resource_id: &str,
        grantee_org_id: &str,
        access_type: &str,
        expiry_timestamp: i64,
    ) -> Result<AccessGrant> {
        let access_type = AccessType::parse_grantable(access_type)?;
        if expiry_timestamp <= 0 {
            return Err(ContractError::Validation(
                "expiryTimestamp must be a positive epoch-seconds value".into(),
            )
            .into());
        }

        let resource = self.query_resource(resource_id).await?;
        let grantee = self.query_org(grantee_org_id).await?;

        let grant = AccessGrant {
            resource_id: resource.resource_id,
            grantee_org_id: grantee.org_id,
            access_type,
            expiry_timestamp,
            is_active: true,
            granted_at: tx.timestamp,
            revoked_at: None,
        };
        self.state
            .put_json(
                &keys::access_key(grant.resource_id.as_str(), grant.grantee_org_id.as_str()),
                &grant,
            )
            .await?;
        tx.emit(EventType::AccessGranted, &grant)?;

        info!(
            resource_id = %grant.resource_id,
            grantee = %grant.grantee_org_id,
            access_type = %grant.access_type,
            expiry = grant.expiry_timestamp,
            "access granted"
        );
        Ok(grant)
    }

    /// Deactivate a grant. Revoking twice is an error.
    pub async fn revoke_access(
        &self,
        tx: &mut TxContext,
        resource_id: &str,
        grantee_org_id: &str,
    ) -> Result<AccessGrant> {
        let mut grant = self
            .query_access(resource_id, grantee_org_id)
            .await?
            .ok_or_else(|| ContractError::GrantNotFound {
                resource_id: resource_id.trim().to_string(),
                org_id: grantee_org_id.trim().to_lowercase(),
            })?;

        if !grant.is_active {
            return Err(ContractError::GrantAlreadyRevoked {
                resource_id: grant.resource_id.to_string(),
                org_id: grant.grantee_org_id.to_string(),
            }
            .into());
        }

        grant.is_active = false;
        grant.revoked_at = Some(tx.timestamp);

        self.state
            .put_json(
                &keys::access_key(grant.resource_id.as_str(), grant.grantee_org_id.as_str()),
                &grant,
            )
            .await?;
        tx.emit(EventType::AccessRevoked, &grant)?;

        info!(resource_id = %grant.resource_id, grantee = %grant.grantee_org_id, "access revoked");
        Ok(grant)
    }

    /// The raw grant for a pair, if one was ever written.
    pub async fn query_access(&self, resource_id: &str, org_id: &str) -> Result<Option<AccessGrant>> {
        let resource_id = ResourceId::parse(resource_id).map_err(ContractError::from)?;
        let org_id = OrgId::parse(org_id).map_err(ContractError::from)?;
        Ok(self
            .state
            .get_json(&keys::access_key(resource_id.as_str(), org_id.as_str()))
            .await?)
    }

    /// Decide whether `org_id` may access `resource_id` at time `now`.
    ///
    /// A missing resource is an error, not a denial. Only the ledger's own
    /// revocation flag is consulted; callers holding an override signal
    /// compose it with [`AccessDecision::apply_override`].
    pub async fn check_access(&self, resource_id: &str, org_id: &str, now: i64) -> Result<AccessDecision> {
        let org_id = OrgId::parse(org_id).map_err(ContractError::from)?;
        let resource = self.query_resource(resource_id).await?;

        let org: Option<Organization> = self.state.get_json(&keys::org_key(org_id.as_str())).await?;
        let org_revoked = org.map(|o| o.is_revoked).unwrap_or(false);

        let grant: Option<AccessGrant> = self
            .state
            .get_json(&keys::access_key(resource.resource_id.as_str(), org_id.as_str()))
            .await?;

        let decision = decide(&resource, &org_id, org_revoked, grant.as_ref(), now);
        debug!(
            resource_id = %resource.resource_id,
            org_id = %org_id,
            has_access = decision.has_access,
            reason = ?decision.reason,
            "access checked"
        );
        Ok(decision)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an audit entry. Resource and actor must exist; no access is
    /// required, so refused requests can be logged with action `DENIED`.
    pub async fn log_access(
        &self,
        tx: &mut TxContext,
        resource_id: &str,
        actor_org_id: &str,
        action: &str,
        access_timestamp: i64,
    ) -> Result<AuditLogEntry> {
        let action = require(action, "action")?;
        let resource = self.query_resource(resource_id).await?;
        let actor = self.query_org(actor_org_id).await?;

        let audit_id = keys::audit_id(
            resource.resource_id.as_str(),
            actor.org_id.as_str(),
            access_timestamp,
            &tx.tx_id,
        );
        let entry = AuditLogEntry {
            audit_id,
            resource_id: resource.resource_id,
            actor_org_id: actor.org_id,
            action,
            access_timestamp,
            logged_at: tx.timestamp,
        };
        self.state
            .put_json(
                &keys::audit_key(entry.resource_id.as_str(), &entry.audit_id),
                &entry,
            )
            .await?;
        tx.emit(EventType::AccessLogged, &entry)?;

        debug!(audit_id = %entry.audit_id, action = %entry.action, "access logged");
        Ok(entry)
    }

    /// All audit entries for a resource, ordered by access time.
    pub async fn audit_trail(&self, resource_id: &str) -> Result<Vec<AuditLogEntry>> {
        let resource = self.query_resource(resource_id).await?;
        let mut entries: Vec<AuditLogEntry> = self
            .state
            .scan_json(&composite_key(AUDIT, &[resource.resource_id.as_str()]))
            .await?;
        entries.sort_by(|a, b| {
            a.access_timestamp
                .cmp(&b.access_timestamp)
                .then_with(|| a.logged_at.cmp(&b.logged_at))
        });
        Ok(entries)
    }
}
