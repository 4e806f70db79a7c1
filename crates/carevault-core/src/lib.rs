//! # CareVault Core
//!
//! Pure primitives for CareVault: authenticated encryption, envelope framing,
//! password-based key derivation, X25519 key shares, and identifier newtypes.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`SymmetricKey`] - A 256-bit content encryption key
//! - [`Sealed`] - The `(ciphertext, iv, tag)` triple produced by [`encrypt`]
//! - [`OrgId`] / [`ResourceId`] - Normalized identifiers
//! - [`SealedKey`] - A symmetric key sealed to an X25519 public key
//!
//! ## Usage
//!
//! ```rust
//! use carevault_core::{encrypt, decrypt, pack_envelope, unpack_envelope, SymmetricKey};
//!
//! let key = SymmetricKey::generate();
//! let sealed = encrypt(b"lab result", key.as_bytes(), None, None).unwrap();
//! let envelope = pack_envelope(&sealed.iv, &sealed.tag, &sealed.ciphertext);
//!
//! let (iv, tag, ciphertext) = unpack_envelope(&envelope).unwrap();
//! let plaintext = decrypt(&ciphertext, key.as_bytes(), iv.as_bytes(), tag.as_bytes(), None).unwrap();
//! assert_eq!(plaintext, b"lab result");
//! ```

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod keyshare;
pub mod types;

pub use crypto::{
    decrypt, derive_key, encrypt, hash, hash_hex, unwrap_key, wrap_key, AuthTag, Iv, Sealed,
    SymmetricKey, DEFAULT_KDF_ITERATIONS, IV_LEN, KEY_LEN, KEY_WRAP_CONTEXT, SALT_LEN, TAG_LEN,
};
pub use envelope::{pack_envelope, unpack_envelope, ENVELOPE_HEADER_LEN};
pub use error::{CryptoError, IdError, Result};
pub use keyshare::{EphemeralKeyPair, SealedKey, SharedKey, X25519PublicKey, X25519StaticSecret};
pub use types::{now_secs, OrgId, ResourceId};
