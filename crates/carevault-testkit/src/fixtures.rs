//! Seeded scenarios.
//!
//! A [`Scenario`] is a broker over in-process backends with three
//! organizations registered and one patient record uploaded by the
//! hospital. The concrete backend handles stay reachable for failure
//! injection.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use carevault_broker::{
    Broker, BrokerConfig, GrantReceipt, GrantRequest, InMemoryBackends, KeyDelivery, Result,
    UploadReceipt, UploadRequest,
};
use carevault_core::now_secs;
use carevault_ledger::{open_local, LedgerClient};

pub const HOSPITAL: &str = "hospital-001";
pub const LAB: &str = "lab-001";
pub const PHARMACY: &str = "pharmacy-001";

pub const PATIENT_RESOURCE: &str = "patient-001";
pub const PATIENT_RESOURCE_TYPE: &str = "fhir-json";
pub const PATIENT_RECORD: &[u8] = br#"{"resourceType":"Patient","id":"patient-001","name":[{"family":"Doe"}]}"#;

/// A seeded broker and its backends.
pub struct Scenario {
    pub broker: Broker,
    pub backends: InMemoryBackends,
    pub ledger: Arc<dyn LedgerClient>,
    pub upload: UploadReceipt,
}

impl Scenario {
    /// Seed with the default configuration.
    pub async fn new() -> Result<Self> {
        Self::with_config(BrokerConfig::default()).await
    }

    pub async fn with_config(config: BrokerConfig) -> Result<Self> {
        Self::with_parts(config, InMemoryBackends::new()).await
    }

    /// Seed over caller-supplied backends.
    pub async fn with_parts(config: BrokerConfig, backends: InMemoryBackends) -> Result<Self> {
        let ledger = open_local(&config.ledger)?;
        Self::with_ledger(config, backends, ledger).await
    }

    /// Seed over caller-supplied backends and ledger.
    pub async fn with_ledger(
        config: BrokerConfig,
        backends: InMemoryBackends,
        ledger: Arc<dyn LedgerClient>,
    ) -> Result<Self> {
        let broker = Broker::new(config, backends.backends(ledger.clone()));

        broker
            .register_org(HOSPITAL, json!({"name": "General Hospital", "type": "hospital"}))
            .await?;
        broker
            .register_org(LAB, json!({"name": "City Lab", "type": "laboratory"}))
            .await?;
        broker
            .register_org(PHARMACY, json!({"name": "Corner Pharmacy", "type": "pharmacy"}))
            .await?;

        let upload = broker
            .upload(UploadRequest {
                resource_id: PATIENT_RESOURCE.into(),
                owner_org_id: HOSPITAL.into(),
                resource_type: PATIENT_RESOURCE_TYPE.into(),
                data: Bytes::from_static(PATIENT_RECORD),
            })
            .await?;

        Ok(Self {
            broker,
            backends,
            ledger,
            upload,
        })
    }

    /// Grant the lab read access for `ttl_secs` (negative for an already
    /// expired grant).
    pub async fn grant_lab(&self, ttl_secs: i64, key_delivery: KeyDelivery) -> Result<GrantReceipt> {
        self.broker
            .grant_access(GrantRequest {
                resource_id: PATIENT_RESOURCE.into(),
                grantee_org_id: LAB.into(),
                access_type: "read".into(),
                expiry_timestamp: now_secs() + ttl_secs,
                key_delivery,
            })
            .await
    }

    /// The content id the patient record is stored under.
    pub fn content_id(&self) -> &str {
        &self.upload.resource.content_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scenario_seeds_ledger() {
        let scenario = Scenario::new().await.unwrap();
        let ledger = scenario.broker.ledger();

        assert!(!ledger.query_org(PHARMACY).await.unwrap().is_revoked);
        let resource = ledger.query_resource(PATIENT_RESOURCE).await.unwrap();
        assert_eq!(resource.owner_org_id.as_str(), HOSPITAL);
        assert_eq!(resource.content_id, scenario.content_id());
        assert_eq!(scenario.backends.blob_store.len(), 1);
    }

    #[tokio::test]
    async fn test_grant_lab() {
        let scenario = Scenario::new().await.unwrap();
        let receipt = scenario.grant_lab(3600, KeyDelivery::Reencryption).await.unwrap();
        assert!(receipt.grant.is_active);
        assert!(receipt.delegation.is_some());
        assert_eq!(scenario.backends.reencryption.rekey_count(), 1);
    }
}
