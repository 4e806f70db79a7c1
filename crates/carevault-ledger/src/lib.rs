//! # CareVault Ledger
//!
//! The consent ledger: organizations, resources, access grants, the audit
//! log, and the `checkAccess` decision.
//!
//! ## Layers
//!
//! - [`StateStore`]: ordered key-value world state ([`MemoryStateStore`],
//!   [`SqliteStateStore`]) addressed by composite keys ([`keys`]).
//! - [`ConsentContract`]: the rules. Mutating calls run inside a
//!   [`TxContext`] and emit [`LedgerEvent`]s.
//! - [`LedgerClient`]: the untyped `submit`/`evaluate` boundary, implemented
//!   in-process by [`LocalLedger`]. [`ConsentClient`] adds types on top.
//!
//! ## Example
//!
//! ```rust,no_run
//! use carevault_ledger::{open_local, ConsentClient, LedgerBackend, NewResource};
//!
//! # async fn example() -> carevault_ledger::Result<()> {
//! let client = ConsentClient::new(open_local(&LedgerBackend::Memory)?);
//! client.register_org("hospital-001", &serde_json::json!({"name": "General"})).await?;
//! client.upload_meta(NewResource {
//!     resource_id: "patient-001",
//!     owner_org_id: "hospital-001",
//!     content_id: "bafy...",
//!     content_hash: "9f86d081...",
//!     resource_type: "fhir-json",
//! }).await?;
//!
//! let decision = client.check_access("patient-001", "HOSPITAL-001").await?;
//! assert!(decision.is_owner);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod contract;
pub mod decision;
pub mod error;
pub mod events;
pub mod keys;
pub mod memory;
pub mod migration;
pub mod model;
pub mod revocation;
pub mod sqlite;
pub mod state;

pub use client::{
    open_local, ConsentClient, LedgerBackend, LedgerClient, LocalLedger, Submitted,
    EVALUATE_FUNCTIONS, SUBMIT_FUNCTIONS,
};
pub use contract::{ConsentContract, NewResource, TxContext};
pub use decision::{decide, AccessDecision, DecisionStatus, DenialReason};
pub use error::{ContractError, LedgerError, Result, StateError};
pub use events::{EventType, LedgerEvent};
pub use memory::MemoryStateStore;
pub use model::{AccessGrant, AccessType, AuditLogEntry, Organization, Resource, ACTION_DENIED};
pub use sqlite::SqliteStateStore;
pub use state::{StateResult, StateStore, StateStoreExt};
