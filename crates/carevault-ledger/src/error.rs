//! Error types for the consent ledger.

use carevault_core::IdError;
use thiserror::Error;

/// Errors from the world-state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Blocking task failed to complete.
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Rule violations raised by the consent contract.
///
/// The `Display` strings are the messages a ledger returns to its callers, so
/// they are part of the contract surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Organization {0} not found")]
    OrgNotFound(String),

    #[error("Organization {0} already exists")]
    OrgExists(String),

    #[error("Resource {0} not found")]
    ResourceNotFound(String),

    #[error("Resource {0} already exists")]
    ResourceExists(String),

    #[error("No access grant found for {org_id} on {resource_id}")]
    GrantNotFound { resource_id: String, org_id: String },

    #[error("Access for {org_id} on {resource_id} is already revoked")]
    GrantAlreadyRevoked { resource_id: String, org_id: String },

    #[error("Organization {0} is not revoked")]
    OrgNotRevoked(String),

    #[error("invalid access type: {0} (expected read, write or admin)")]
    InvalidAccessType(String),

    #[error("{0}")]
    Validation(String),
}

impl From<IdError> for ContractError {
    fn from(err: IdError) -> Self {
        ContractError::Validation(err.to_string())
    }
}

/// Errors surfaced by a [`LedgerClient`](crate::LedgerClient).
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The contract rejected the call.
    #[error(transparent)]
    Contract(#[from] ContractError),

    /// The world state could not be read or written.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// No contract function with this name.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A mutating function was sent through `evaluate`.
    #[error("function {0} modifies state and must be submitted")]
    NotReadOnly(String),

    /// Wrong number or shape of arguments.
    #[error("invalid arguments for {function}: {reason}")]
    InvalidArguments { function: String, reason: String },

    /// The ledger returned a payload the client could not decode.
    #[error("malformed ledger response: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The ledger could not be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// True if this is the contract's "resource not found" rejection.
    pub fn is_resource_not_found(&self) -> bool {
        matches!(self, LedgerError::Contract(ContractError::ResourceNotFound(_)))
    }

    /// True if the ledger itself failed, as opposed to rejecting the call.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_) | LedgerError::State(_))
    }
}

/// Result type for contract calls.
pub type ContractResult<T> = std::result::Result<T, ContractError>;

/// Result type for ledger client calls.
pub type Result<T> = std::result::Result<T, LedgerError>;
