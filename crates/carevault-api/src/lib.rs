//! CareVault API Server
//!
//! REST surface over the access broker.
//!
//! ## Endpoints
//!
//! ### Resources
//! - POST /resources - Encrypt and store a record (base64 `data`)
//! - GET /resources/:resource_id - Retrieve plaintext (header `x-org-id`)
//! - GET /resources/:resource_id/metadata - Metadata and access decision (header `x-org-id`)
//!
//! ### Access
//! - POST /access/grant - Grant access and deliver the key
//! - POST /access/revoke - Revoke a grant
//! - GET /access/check/:resource_id - Access decision for the caller (header `x-org-id`)
//!
//! ### Organizations
//! - POST /orgs - Register organization
//! - POST /orgs/revoke - Revoke organization (local override and ledger)
//! - POST /orgs/reinstate - Reinstate organization
//!
//! ### Overrides
//! - POST /attack/override - Set an override flag
//! - POST /attack/clear - Clear every override
//! - GET /attack/status - List overrides
//!
//! Errors answer `{"error": message, "code": CODE}`.

pub mod dto;
pub mod error;
pub mod extract;
pub mod routes;
pub mod server;
pub mod state;

pub use dto::*;
pub use error::*;
pub use extract::{ApiJson, CallerOrg, ORG_HEADER};
pub use routes::*;
pub use server::*;
pub use state::*;
