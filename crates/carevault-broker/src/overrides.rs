//! Runtime revocation overrides.
//!
//! The override layer lets operators deny an organization immediately,
//! ahead of (or without) a ledger transaction. Its state is held behind the
//! [`OverrideStore`] trait so a shared cache can replace the in-process map.
//! When the override and a stale or unreachable ledger disagree, the
//! override wins.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use carevault_core::{now_secs, OrgId};
use carevault_ledger::ConsentClient;

use crate::error::{BrokerError, Result};

/// Kind of simulated attack or incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackType {
    Revoked,
    Compromised,
    Expired,
    Unauthorized,
}

impl AttackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::Revoked => "revoked",
            AttackType::Compromised => "compromised",
            AttackType::Expired => "expired",
            AttackType::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for AttackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttackType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "revoked" => Ok(AttackType::Revoked),
            "compromised" => Ok(AttackType::Compromised),
            "expired" => Ok(AttackType::Expired),
            "unauthorized" => Ok(AttackType::Unauthorized),
            _ => Err(BrokerError::Validation(format!(
                "invalid attackType: {} (expected revoked, compromised, expired or unauthorized)",
                s
            ))),
        }
    }
}

/// One override entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideEntry {
    pub active: bool,
    pub attack_type: AttackType,
    pub timestamp: i64,
}

/// An org and its override, as listed by [`OverrideStore::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideStatus {
    pub org_id: OrgId,
    #[serde(flatten)]
    pub entry: OverrideEntry,
    pub revoked: bool,
}

/// Storage for override state. Last writer wins per org.
pub trait OverrideStore: Send + Sync {
    /// Upsert an entry. An active `revoked` entry joins the revoked set;
    /// an inactive entry leaves it.
    fn set(&self, org_id: &OrgId, entry: OverrideEntry);

    /// Put an org in the revoked set with an active `revoked` entry.
    fn revoke(&self, org_id: &OrgId, timestamp: i64);

    /// Drop an org's entry and revoked-set membership. True if anything was
    /// removed.
    fn remove(&self, org_id: &OrgId) -> bool;

    fn get(&self, org_id: &OrgId) -> Option<OverrideEntry>;

    /// True if the override denies this org.
    fn is_revoked(&self, org_id: &OrgId) -> bool;

    /// Wipe everything. Returns the number of orgs cleared.
    fn clear(&self) -> usize;

    /// Current entries, ordered by org id.
    fn snapshot(&self) -> Vec<OverrideStatus>;
}

#[derive(Default)]
struct OverrideState {
    entries: HashMap<OrgId, OverrideEntry>,
    revoked: HashSet<OrgId>,
}

/// In-process override map.
#[derive(Default)]
pub struct MemoryOverrideStore {
    inner: RwLock<OverrideState>,
}

impl MemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverrideStore for MemoryOverrideStore {
    fn set(&self, org_id: &OrgId, entry: OverrideEntry) {
        let Ok(mut state) = self.inner.write() else {
            warn!("override store lock poisoned");
            return;
        };
        if entry.active && entry.attack_type == AttackType::Revoked {
            state.revoked.insert(org_id.clone());
        } else {
            state.revoked.remove(org_id);
        }
        state.entries.insert(org_id.clone(), entry);
    }

    fn revoke(&self, org_id: &OrgId, timestamp: i64) {
        self.set(
            org_id,
            OverrideEntry {
                active: true,
                attack_type: AttackType::Revoked,
                timestamp,
            },
        );
    }

    fn remove(&self, org_id: &OrgId) -> bool {
        let Ok(mut state) = self.inner.write() else {
            warn!("override store lock poisoned");
            return false;
        };
        let had_entry = state.entries.remove(org_id).is_some();
        let was_revoked = state.revoked.remove(org_id);
        had_entry || was_revoked
    }

    fn get(&self, org_id: &OrgId) -> Option<OverrideEntry> {
        self.inner.read().ok()?.entries.get(org_id).copied()
    }

    fn is_revoked(&self, org_id: &OrgId) -> bool {
        match self.inner.read() {
            Ok(state) => state.revoked.contains(org_id),
            // Fail closed.
            Err(_) => true,
        }
    }

    fn clear(&self) -> usize {
        let Ok(mut state) = self.inner.write() else {
            warn!("override store lock poisoned");
            return 0;
        };
        let orgs: HashSet<OrgId> = state
            .entries
            .keys()
            .chain(state.revoked.iter())
            .cloned()
            .collect();
        state.entries.clear();
        state.revoked.clear();
        orgs.len()
    }

    fn snapshot(&self) -> Vec<OverrideStatus> {
        let Ok(state) = self.inner.read() else {
            return Vec::new();
        };
        let mut out: Vec<OverrideStatus> = state
            .entries
            .iter()
            .map(|(org_id, entry)| OverrideStatus {
                org_id: org_id.clone(),
                entry: *entry,
                revoked: state.revoked.contains(org_id),
            })
            .collect();
        out.sort_by(|a, b| a.org_id.cmp(&b.org_id));
        out
    }
}

/// Outcome of a revoke or reinstate, local and ledger side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationOutcome {
    pub org_id: OrgId,

    /// Ledger transaction id, if the ledger accepted the change.
    pub tx_id: Option<String>,

    pub timestamp: i64,

    /// Why the ledger side did not apply, if it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_error: Option<String>,
}

/// Override operations, including propagation to the ledger.
#[derive(Clone)]
pub struct OverrideLayer {
    store: Arc<dyn OverrideStore>,
    ledger: ConsentClient,
    ledger_timeout: Duration,
}

fn parse_org(raw: &str) -> Result<OrgId> {
    OrgId::parse(raw).map_err(|e| BrokerError::Validation(e.to_string()))
}

impl OverrideLayer {
    pub fn new(store: Arc<dyn OverrideStore>, ledger: ConsentClient, ledger_timeout: Duration) -> Self {
        Self {
            store,
            ledger,
            ledger_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn OverrideStore> {
        &self.store
    }

    /// True if the override denies `org_id`.
    pub fn is_revoked(&self, org_id: &OrgId) -> bool {
        self.store.is_revoked(org_id)
    }

    /// Set or clear an override entry. Local only.
    pub fn set_override(&self, org_id: &str, active: bool, attack_type: AttackType) -> Result<OverrideStatus> {
        let org_id = parse_org(org_id)?;
        let entry = OverrideEntry {
            active,
            attack_type,
            timestamp: now_secs(),
        };
        self.store.set(&org_id, entry);

        info!(%org_id, active, attack_type = %attack_type, "override set");
        Ok(OverrideStatus {
            revoked: self.store.is_revoked(&org_id),
            org_id,
            entry,
        })
    }

    /// Revoke locally, then try the ledger. The local revocation stands
    /// even if the ledger call fails.
    pub async fn revoke_org_override(&self, org_id: &str, reason: Option<&str>) -> Result<RevocationOutcome> {
        let org_id = parse_org(org_id)?;
        let timestamp = now_secs();
        self.store.revoke(&org_id, timestamp);

        let ledger_call = self.ledger.revoke_org(org_id.as_str(), reason);
        let outcome = match tokio::time::timeout(self.ledger_timeout, ledger_call).await {
            Ok(Ok(submitted)) => RevocationOutcome {
                org_id: org_id.clone(),
                tx_id: Some(submitted.tx_id),
                timestamp: submitted.timestamp,
                ledger_error: None,
            },
            Ok(Err(e)) => {
                warn!(%org_id, error = %e, "ledger revocation failed; override applied locally");
                RevocationOutcome {
                    org_id: org_id.clone(),
                    tx_id: None,
                    timestamp,
                    ledger_error: Some(e.to_string()),
                }
            }
            Err(_) => {
                warn!(%org_id, "ledger revocation timed out; override applied locally");
                RevocationOutcome {
                    org_id: org_id.clone(),
                    tx_id: None,
                    timestamp,
                    ledger_error: Some("ledger timed out".into()),
                }
            }
        };

        info!(%org_id, tx_id = ?outcome.tx_id, "organization revoked");
        Ok(outcome)
    }

    /// Clear the local override, then try to reinstate on the ledger.
    /// Ledger failure is logged only.
    pub async fn reinstate(&self, org_id: &str) -> Result<RevocationOutcome> {
        let org_id = parse_org(org_id)?;
        let timestamp = now_secs();
        self.store.remove(&org_id);

        let ledger_call = self.ledger.reinstate_org(org_id.as_str());
        let outcome = match tokio::time::timeout(self.ledger_timeout, ledger_call).await {
            Ok(Ok(submitted)) => RevocationOutcome {
                org_id: org_id.clone(),
                tx_id: Some(submitted.tx_id),
                timestamp: submitted.timestamp,
                ledger_error: None,
            },
            Ok(Err(e)) => {
                warn!(%org_id, error = %e, "ledger reinstatement failed; override cleared locally");
                RevocationOutcome {
                    org_id: org_id.clone(),
                    tx_id: None,
                    timestamp,
                    ledger_error: Some(e.to_string()),
                }
            }
            Err(_) => {
                warn!(%org_id, "ledger reinstatement timed out; override cleared locally");
                RevocationOutcome {
                    org_id: org_id.clone(),
                    tx_id: None,
                    timestamp,
                    ledger_error: Some("ledger timed out".into()),
                }
            }
        };

        info!(%org_id, tx_id = ?outcome.tx_id, "organization reinstated");
        Ok(outcome)
    }

    /// Wipe all override state.
    pub fn clear_all(&self) -> usize {
        let cleared = self.store.clear();
        info!(cleared, "overrides cleared");
        cleared
    }

    pub fn snapshot(&self) -> Vec<OverrideStatus> {
        self.store.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carevault_ledger::{open_local, LedgerBackend};
    use proptest::prelude::*;

    fn org(s: &str) -> OrgId {
        OrgId::parse(s).unwrap()
    }

    fn layer() -> OverrideLayer {
        let ledger = ConsentClient::new(open_local(&LedgerBackend::Memory).unwrap());
        OverrideLayer::new(Arc::new(MemoryOverrideStore::new()), ledger, Duration::from_secs(5))
    }

    #[test]
    fn test_attack_type_parse() {
        assert_eq!("Revoked".parse::<AttackType>().unwrap(), AttackType::Revoked);
        assert!("meteor".parse::<AttackType>().is_err());
    }

    #[test]
    fn test_only_active_revoked_denies() {
        let store = MemoryOverrideStore::new();
        let lab = org("lab-001");

        store.set(&lab, OverrideEntry { active: true, attack_type: AttackType::Compromised, timestamp: 1 });
        assert!(!store.is_revoked(&lab));

        store.set(&lab, OverrideEntry { active: true, attack_type: AttackType::Revoked, timestamp: 2 });
        assert!(store.is_revoked(&lab));

        store.set(&lab, OverrideEntry { active: false, attack_type: AttackType::Revoked, timestamp: 3 });
        assert!(!store.is_revoked(&lab));
        assert_eq!(store.get(&lab).unwrap().timestamp, 3);
    }

    #[test]
    fn test_clear_counts_orgs() {
        let store = MemoryOverrideStore::new();
        store.revoke(&org("a"), 1);
        store.set(&org("b"), OverrideEntry { active: true, attack_type: AttackType::Expired, timestamp: 1 });
        assert_eq!(store.snapshot().len(), 2);

        assert_eq!(store.clear(), 2);
        assert!(store.snapshot().is_empty());
        assert!(!store.is_revoked(&org("a")));
    }

    #[test]
    fn test_set_override_normalizes_org() {
        let layer = layer();
        let status = layer.set_override("LAB-001", true, AttackType::Revoked).unwrap();
        assert_eq!(status.org_id.as_str(), "lab-001");
        assert!(status.revoked);
        assert!(layer.is_revoked(&org("lab-001")));

        assert!(matches!(
            layer.set_override("  ", true, AttackType::Revoked),
            Err(BrokerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_propagates_to_ledger() {
        let layer = layer();
        let outcome = layer.revoke_org_override("rogue-lab", Some("exfiltration")).await.unwrap();

        assert!(outcome.tx_id.is_some());
        assert!(layer.is_revoked(&org("rogue-lab")));
        let on_ledger = layer.ledger.query_org("rogue-lab").await.unwrap();
        assert!(on_ledger.is_revoked);
    }

    #[tokio::test]
    async fn test_reinstate_clears_locally_even_if_ledger_refuses() {
        let layer = layer();
        layer.set_override("lab-001", true, AttackType::Revoked).unwrap();

        // Never revoked on the ledger, so the ledger refuses.
        let outcome = layer.reinstate("lab-001").await.unwrap();
        assert!(outcome.tx_id.is_none());
        assert!(outcome.ledger_error.is_some());
        assert!(!layer.is_revoked(&org("lab-001")));
    }

    #[tokio::test]
    async fn test_concurrent_toggles_are_safe() {
        let layer = layer();
        let mut handles = Vec::new();
        for i in 0..32 {
            let layer = layer.clone();
            handles.push(tokio::spawn(async move {
                layer.set_override(&format!("org-{}", i % 4), i % 2 == 0, AttackType::Revoked)
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(layer.snapshot().len(), 4);
    }

    fn attack_type() -> impl Strategy<Value = AttackType> {
        prop_oneof![
            Just(AttackType::Revoked),
            Just(AttackType::Compromised),
            Just(AttackType::Expired),
            Just(AttackType::Unauthorized),
        ]
    }

    proptest! {
        #[test]
        fn prop_last_write_decides(
            writes in prop::collection::vec((0usize..3, any::<bool>(), attack_type()), 1..40)
        ) {
            let store = MemoryOverrideStore::new();
            let orgs = [org("hospital-001"), org("lab-001"), org("pharmacy-001")];
            let mut last: HashMap<usize, (bool, AttackType)> = HashMap::new();

            for (ts, (i, active, attack_type)) in writes.into_iter().enumerate() {
                store.set(&orgs[i], OverrideEntry { active, attack_type, timestamp: ts as i64 });
                last.insert(i, (active, attack_type));
            }

            for (i, id) in orgs.iter().enumerate() {
                let expected = matches!(last.get(&i), Some((true, AttackType::Revoked)));
                prop_assert_eq!(store.is_revoked(id), expected);
            }
            prop_assert_eq!(store.snapshot().len(), last.len());
        }
    }
}
