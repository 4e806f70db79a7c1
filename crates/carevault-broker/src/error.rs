//! Error types for the broker.

use thiserror::Error;

use carevault_core::CryptoError;
use carevault_ledger::{DenialReason, LedgerError};

use crate::backend::BackendError;
use crate::keys::KeyError;

/// Terminal outcomes of a retrieval or probe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    /// Resource or its metadata is absent.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Access denied. The reason is safe to show to the caller.
    #[error("access denied: {0}")]
    Forbidden(String),

    /// Stored bytes do not match the recorded hash.
    #[error("integrity check failed for {0}")]
    IntegrityFailure(String),

    /// Re-encryption or key sharing failed.
    #[error("key resolution failed: {0}")]
    KeyResolutionFailed(String),

    /// Authentication tag mismatch. Never carries detail.
    #[error("decryption failed")]
    DecryptionFailed,

    /// No blob gateway could serve the content in time.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The secret store (or re-encryption service) is unreachable, or the
    /// owner key record is missing.
    #[error("key service unavailable: {0}")]
    KeyServiceUnavailable(String),

    /// The ledger could not answer.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Malformed input.
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl RetrievalError {
    pub fn forbidden(reason: DenialReason) -> Self {
        RetrievalError::Forbidden(reason.to_string())
    }

    /// HTTP status this outcome maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            RetrievalError::ValidationError(_) => 400,
            RetrievalError::Forbidden(_) | RetrievalError::KeyResolutionFailed(_) => 403,
            RetrievalError::NotFound(_) => 404,
            RetrievalError::IntegrityFailure(_) | RetrievalError::DecryptionFailed => 500,
            RetrievalError::StorageUnavailable(_)
            | RetrievalError::KeyServiceUnavailable(_)
            | RetrievalError::LedgerUnavailable(_) => 503,
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RetrievalError::NotFound(_) => "NOT_FOUND",
            RetrievalError::Forbidden(_) => "FORBIDDEN",
            RetrievalError::IntegrityFailure(_) => "INTEGRITY_FAILURE",
            RetrievalError::KeyResolutionFailed(_) => "KEY_RESOLUTION_FAILED",
            RetrievalError::DecryptionFailed => "DECRYPTION_FAILED",
            RetrievalError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            RetrievalError::KeyServiceUnavailable(_) => "KEY_SERVICE_UNAVAILABLE",
            RetrievalError::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            RetrievalError::ValidationError(_) => "VALIDATION_ERROR",
        }
    }

    /// Message for the caller. Crypto failures are flattened.
    pub fn public_message(&self) -> String {
        match self {
            RetrievalError::DecryptionFailed => "internal error".to_string(),
            RetrievalError::Forbidden(reason) => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Map a ledger failure during the access check.
    pub(crate) fn from_ledger(err: LedgerError) -> Self {
        match err {
            e if e.is_resource_not_found() => RetrievalError::NotFound(e.to_string()),
            LedgerError::Contract(e) => RetrievalError::ValidationError(e.to_string()),
            LedgerError::InvalidArguments { reason, .. } => RetrievalError::ValidationError(reason),
            other => RetrievalError::LedgerUnavailable(other.to_string()),
        }
    }
}

/// Errors from broker operations other than retrieval.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
