//! Data Transfer Objects for API requests and responses
//!
//! Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use carevault_broker::{AuditStats, OverrideStatus};

// ============ Resource DTOs ============

/// Upload resource request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResourceRequest {
    pub resource_id: String,
    pub owner_org_id: String,
    pub resource_type: String,
    /// Plaintext record, base64 (standard alphabet)
    pub data: String,
}

// ============ Organization DTOs ============

/// Register organization request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOrgRequest {
    pub org_id: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Revoke or reinstate an organization
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgRequest {
    pub org_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

// ============ Access DTOs ============

/// Grant access request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantAccessRequest {
    pub resource_id: String,
    pub grantee_org_id: String,
    pub access_type: String,
    /// Epoch seconds
    pub expiry_timestamp: i64,
    /// `reencryption` (default), `direct` or `none`
    #[serde(default)]
    pub key_delivery: Option<String>,
}

/// Revoke access request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeAccessRequest {
    pub resource_id: String,
    pub grantee_org_id: String,
}

// ============ Override DTOs ============

fn default_active() -> bool {
    true
}

/// Toggle an attack override
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    pub org_id: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub attack_type: String,
}

/// Override listing
#[derive(Debug, Serialize)]
pub struct OverrideListResponse {
    pub overrides: Vec<OverrideStatus>,
}

/// Result of clearing overrides
#[derive(Debug, Serialize)]
pub struct ClearOverridesResponse {
    pub cleared: usize,
}

// ============ Health DTOs ============

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub audit: AuditStats,
    pub overrides: usize,
}
