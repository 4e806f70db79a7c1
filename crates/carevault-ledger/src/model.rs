//! Ledger entities.
//!
//! These are the JSON documents the contract keeps in world state. Field
//! names are camelCase on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use carevault_core::{OrgId, ResourceId};

use crate::error::{ContractError, ContractResult};

/// A participating organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub org_id: OrgId,

    /// Opaque descriptive data (name, type, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,

    pub registered_at: i64,

    #[serde(default)]
    pub is_revoked: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinstated_at: Option<i64>,
}

/// Metadata for one encrypted off-ledger artifact. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_id: ResourceId,
    pub owner_org_id: OrgId,

    /// Blob store address of the packed envelope.
    pub content_id: String,

    /// Lowercase hex SHA-256 of the encrypted bytes.
    pub content_hash: String,

    pub resource_type: String,
    pub uploaded_at: i64,
}

/// Level of access. `Owner` is implied by ownership and never granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Owner,
    Read,
    Write,
    Admin,
}

impl AccessType {
    /// Parse a grantable access type, ignoring case.
    pub fn parse_grantable(raw: &str) -> ContractResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(AccessType::Read),
            "write" => Ok(AccessType::Write),
            "admin" => Ok(AccessType::Admin),
            _ => Err(ContractError::InvalidAccessType(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Owner => "owner",
            AccessType::Read => "read",
            AccessType::Write => "write",
            AccessType::Admin => "admin",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessType {
    type Err = ContractError;

    fn from_str(s: &str) -> ContractResult<Self> {
        Self::parse_grantable(s)
    }
}

/// A time-bounded permission from a resource owner to another organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub resource_id: ResourceId,
    pub grantee_org_id: OrgId,
    pub access_type: AccessType,

    /// Epoch seconds.
    pub expiry_timestamp: i64,

    pub is_active: bool,
    pub granted_at: i64,

    #[serde(default)]
    pub revoked_at: Option<i64>,
}

impl AccessGrant {
    /// Expiry is judged on its own; a grant can be active and expired.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry_timestamp < now
    }
}

/// One immutable access event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub audit_id: String,
    pub resource_id: ResourceId,
    pub actor_org_id: OrgId,

    /// Free-form; `DENIED` marks a refused request.
    pub action: String,

    pub access_timestamp: i64,
    pub logged_at: i64,
}

/// Action recorded for refused requests.
pub const ACTION_DENIED: &str = "DENIED";
