//! External collaborators.
//!
//! Each backend the broker talks to is a trait with an in-process
//! implementation. Deployments select implementations at startup; business
//! logic never branches on which one it got.

pub mod blob;
pub mod gateway;
pub mod reencrypt;
pub mod secret;

use thiserror::Error;

use carevault_core::CryptoError;

pub use blob::{BlobStore, Gateway, MemoryBlobStore, MemoryGateway};
pub use gateway::{GatewayRace, SizeClass};
pub use reencrypt::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, MemoryReencryptionService,
    PrepareResponse, ReencryptRequest, ReencryptResponse, ReencryptionService, RekeyRequest,
    RekeyResponse,
};
pub use secret::{MemorySecretStore, SecretData, SecretStore};

/// Errors reported by backend implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The addressed object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A time-limited credential has lapsed.
    #[error("expired: {0}")]
    Expired(String),

    /// The backend could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish within its budget.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;
