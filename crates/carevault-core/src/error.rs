//! Error types for CareVault core primitives.

use thiserror::Error;

/// Errors from the crypto primitives.
///
/// Every tag-verification failure collapses into [`CryptoError::AuthenticationFailed`]
/// so callers cannot tell a wrong key from a tampered ciphertext.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid IV length: expected {expected}, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("envelope too short: {len} bytes")]
    EnvelopeTooShort { len: usize },

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("iteration count must be greater than zero")]
    InvalidIterations,

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
}

/// Identifier validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// NUL and other control characters would corrupt composite state keys.
    #[error("{0} must not contain control characters")]
    ControlCharacter(&'static str),
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
