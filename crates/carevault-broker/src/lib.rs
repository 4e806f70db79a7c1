//! # CareVault Broker
//!
//! Decides whether an organization may read an encrypted health record,
//! obtains the right decryption key, and returns verified plaintext.
//!
//! ## Pieces
//!
//! - [`backend`]: blob gateways and the [`GatewayRace`](backend::GatewayRace),
//!   the secret store, the re-encryption service.
//! - [`overrides`]: runtime revocation that wins over the ledger.
//! - [`keys`]: secret-store layout, key provisioning, key resolution.
//! - [`pipeline`]: the retrieval stages and their terminal errors.
//! - [`audit`]: the background audit writer.
//! - [`Broker`]: everything wired together.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use carevault_broker::{Broker, BrokerConfig, UploadRequest};
//!
//! # async fn example() -> carevault_broker::Result<()> {
//! let broker = Broker::in_memory(BrokerConfig::default())?;
//! broker.register_org("hospital-001", serde_json::json!({"name": "General"})).await?;
//! broker.upload(UploadRequest {
//!     resource_id: "patient-001".into(),
//!     owner_org_id: "hospital-001".into(),
//!     resource_type: "fhir-json".into(),
//!     data: Bytes::from_static(b"{\"resourceType\":\"Patient\"}"),
//! }).await?;
//!
//! let record = broker.retrieve("patient-001", "hospital-001").await
//!     .expect("owner can read");
//! assert_eq!(record.content_type, "application/fhir+json");
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod backend;
pub mod broker;
pub mod config;
pub mod error;
pub mod keys;
pub mod overrides;
pub mod pipeline;

pub use audit::{AuditEvent, AuditHandle, AuditStats, AuditWorker};
pub use backend::{BackendError, SizeClass};
pub use broker::{
    Broker, BrokerBackends, GrantReceipt, GrantRequest, InMemoryBackends, KeyDelivery,
    TxReceipt, UploadReceipt, UploadRequest,
};
pub use config::{AuditConfig, BrokerConfig, GatewayConfig};
pub use error::{BrokerError, Result, RetrievalError};
pub use keys::{Delegation, KeyError, KeyProvisioner, KeyResolver, SecretPaths};
pub use overrides::{
    AttackType, MemoryOverrideStore, OverrideEntry, OverrideLayer, OverrideStatus, OverrideStore,
    RevocationOutcome,
};
pub use pipeline::{content_type_for, DecryptedResource, ResourceProbe, ACTION_RETRIEVE};
