//! Access decisions.
//!
//! [`decide`] is the pure part of `checkAccess`: given the already-loaded
//! resource, the caller's revocation state and its grant (if any), it walks
//! the rules in order and the first match wins.

use std::fmt;

use serde::{Deserialize, Serialize};

use carevault_core::OrgId;

use crate::model::{AccessGrant, AccessType, Resource};
use crate::revocation;

/// Set on decisions that deny because the organization is revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionStatus {
    #[serde(rename = "DENIED")]
    Denied,
}

/// Why access was refused. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenialReason {
    #[serde(rename = "organization revoked")]
    OrganizationRevoked,

    #[serde(rename = "No access grant found")]
    NoGrant,

    #[serde(rename = "Access has been revoked")]
    GrantRevoked,

    #[serde(rename = "Access has expired")]
    GrantExpired,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::OrganizationRevoked => "organization revoked",
            DenialReason::NoGrant => "No access grant found",
            DenialReason::GrantRevoked => "Access has been revoked",
            DenialReason::GrantExpired => "Access has expired",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `checkAccess`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub has_access: bool,

    #[serde(default)]
    pub is_owner: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_type: Option<AccessType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_timestamp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DecisionStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

impl AccessDecision {
    pub fn owner() -> Self {
        Self {
            has_access: true,
            is_owner: true,
            access_type: Some(AccessType::Owner),
            expiry_timestamp: None,
            status: None,
            reason: None,
        }
    }

    pub fn granted(grant: &AccessGrant) -> Self {
        Self {
            has_access: true,
            is_owner: false,
            access_type: Some(grant.access_type),
            expiry_timestamp: Some(grant.expiry_timestamp),
            status: None,
            reason: None,
        }
    }

    /// A refusal. Revocation denials carry `status: DENIED`.
    pub fn denied(reason: DenialReason) -> Self {
        let status = match reason {
            DenialReason::OrganizationRevoked => Some(DecisionStatus::Denied),
            _ => None,
        };
        Self {
            has_access: false,
            is_owner: false,
            access_type: None,
            expiry_timestamp: None,
            status,
            reason: Some(reason),
        }
    }

    /// Compose a ledger decision with the runtime override signal.
    ///
    /// Used when the decision came from a ledger that cannot see the
    /// override layer. An override revocation beats ownership and grants
    /// alike.
    pub fn apply_override(self, override_revoked: bool) -> Self {
        let ledger_revoked = self.reason == Some(DenialReason::OrganizationRevoked);
        if revocation::is_denied(ledger_revoked, override_revoked) {
            Self::denied(DenialReason::OrganizationRevoked)
        } else {
            self
        }
    }
}

/// Evaluate the access rules for `org_id` on an existing `resource`.
///
/// `org_revoked` must already include every revocation source the caller
/// knows about. `grant` is the grant keyed by `(resource, org_id)`, if any.
pub fn decide(
    resource: &Resource,
    org_id: &OrgId,
    org_revoked: bool,
    grant: Option<&AccessGrant>,
    now: i64,
) -> AccessDecision {
    if org_revoked {
        return AccessDecision::denied(DenialReason::OrganizationRevoked);
    }

    if *org_id == resource.owner_org_id {
        return AccessDecision::owner();
    }

    let Some(grant) = grant else {
        return AccessDecision::denied(DenialReason::NoGrant);
    };

    if !grant.is_active {
        return AccessDecision::denied(DenialReason::GrantRevoked);
    }

    if grant.is_expired(now) {
        return AccessDecision::denied(DenialReason::GrantExpired);
    }

    AccessDecision::granted(grant)
}
