//! Broker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use carevault_ledger::LedgerBackend;

use crate::backend::SizeClass;

/// Top-level broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Prefix for every secret-store path.
    pub namespace: String,

    /// Which world-state store the in-process ledger uses.
    pub ledger: LedgerBackend,

    pub gateway: GatewayConfig,

    pub audit: AuditConfig,

    /// Bound on secret-store reads and each re-encryption call.
    #[serde(with = "duration_ms", rename = "key_timeout_ms")]
    pub key_timeout: Duration,

    /// Bound on each ledger call.
    #[serde(with = "duration_ms", rename = "ledger_timeout_ms")]
    pub ledger_timeout: Duration,

    /// Accept a directly shared key when no rekey record exists.
    pub allow_shared_key_fallback: bool,

    /// Lifetime of rekeys created when delegating, in seconds.
    pub rekey_ttl_secs: i64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            namespace: "carevault".to_string(),
            ledger: LedgerBackend::Memory,
            gateway: GatewayConfig::default(),
            audit: AuditConfig::default(),
            key_timeout: Duration::from_secs(10),
            ledger_timeout: Duration::from_secs(10),
            allow_shared_key_fallback: true,
            rekey_ttl_secs: 86_400,
        }
    }
}

/// Blob gateway race settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// How long the primary runs alone before fallbacks start.
    #[serde(with = "duration_ms", rename = "head_start_ms")]
    pub head_start: Duration,

    #[serde(with = "duration_ms", rename = "small_budget_ms")]
    pub small_budget: Duration,

    #[serde(with = "duration_ms", rename = "medium_budget_ms")]
    pub medium_budget: Duration,

    #[serde(with = "duration_ms", rename = "large_budget_ms")]
    pub large_budget: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            head_start: Duration::from_secs(1),
            small_budget: Duration::from_secs(10),
            medium_budget: Duration::from_secs(30),
            large_budget: Duration::from_secs(120),
        }
    }
}

impl GatewayConfig {
    /// Overall fetch budget for a size class.
    pub fn budget(&self, size: SizeClass) -> Duration {
        match size {
            SizeClass::Small => self.small_budget,
            SizeClass::Medium => self.medium_budget,
            SizeClass::Large => self.large_budget,
        }
    }
}

/// Background audit worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Queue capacity; entries beyond it are dropped.
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Durations as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
