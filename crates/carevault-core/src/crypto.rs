//! Symmetric crypto primitives.
//!
//! Provides ChaCha20-Poly1305 authenticated encryption with detached tags,
//! SHA-256 content hashing, context-bound key wrapping, and PBKDF2 key
//! derivation.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::envelope::pack_envelope;
use crate::error::{CryptoError, Result};

/// Symmetric key length in bytes.
pub const KEY_LEN: usize = 32;

/// IV (nonce) length in bytes.
pub const IV_LEN: usize = 12;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Salt length generated by [`derive_key`].
pub const SALT_LEN: usize = 16;

/// Default PBKDF2 iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// AAD bound into every wrapped key. Bumping the version invalidates old wraps.
pub const KEY_WRAP_CONTEXT: &[u8] = b"carevault/key-wrap/v1";

/// A 256-bit symmetric encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Encode as standard base64 (the secret-store representation).
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Decode from standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Encrypt with a fresh IV.
    pub fn encrypt(&self, plaintext: &[u8], aad: Option<&[u8]>) -> Result<Sealed> {
        encrypt(plaintext, &self.0, None, aad)
    }

    /// Decrypt a sealed triple.
    pub fn decrypt(&self, sealed: &Sealed, aad: Option<&[u8]>) -> Result<Vec<u8>> {
        decrypt(
            &sealed.ciphertext,
            &self.0,
            sealed.iv.as_bytes(),
            sealed.tag.as_bytes(),
            aad,
        )
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// A 96-bit IV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv(pub [u8; IV_LEN]);

impl Iv {
    /// Generate a new random IV.
    pub fn generate() -> Self {
        let mut bytes = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; IV_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; IV_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidIvLength {
            expected: IV_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; IV_LEN] {
        &self.0
    }
}

/// A 128-bit Poly1305 authentication tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthTag(pub [u8; TAG_LEN]);

impl AuthTag {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; TAG_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }
}

/// Output of [`encrypt`]: ciphertext with its IV and detached tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Iv,
    pub tag: AuthTag,
}

impl Sealed {
    /// Pack into the `[iv][tag][ciphertext]` envelope layout.
    pub fn to_envelope(&self) -> Vec<u8> {
        pack_envelope(&self.iv, &self.tag, &self.ciphertext)
    }
}

fn cipher_for(key: &[u8]) -> Result<ChaCha20Poly1305> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_LEN,
        actual: key.len(),
    })
}

/// Encrypt `plaintext` under a 32-byte key.
///
/// A random IV is generated unless one is supplied; a supplied IV must be
/// exactly 12 bytes.
pub fn encrypt(
    plaintext: &[u8],
    key: &[u8],
    iv: Option<&[u8]>,
    aad: Option<&[u8]>,
) -> Result<Sealed> {
    let cipher = cipher_for(key)?;
    let iv = match iv {
        Some(bytes) => Iv::from_slice(bytes)?,
        None => Iv::generate(),
    };

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(
            Nonce::from_slice(iv.as_bytes()),
            aad.unwrap_or_default(),
            &mut buffer,
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(Sealed {
        ciphertext: buffer,
        iv,
        tag: AuthTag(tag_bytes),
    })
}

/// Decrypt and verify.
///
/// Wrong key, wrong AAD, tampered ciphertext, malformed IV or tag all yield
/// [`CryptoError::AuthenticationFailed`].
pub fn decrypt(
    ciphertext: &[u8],
    key: &[u8],
    iv: &[u8],
    tag: &[u8],
    aad: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            aad.unwrap_or_default(),
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    Ok(buffer)
}

/// SHA-256 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 digest as lowercase hex (the ledger's `contentHash` format).
pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(hash(data))
}

/// Wrap a key under a key-encryption key, bound to [`KEY_WRAP_CONTEXT`].
pub fn wrap_key(key_to_wrap: &[u8], kek: &[u8]) -> Result<Sealed> {
    encrypt(key_to_wrap, kek, None, Some(KEY_WRAP_CONTEXT))
}

/// Unwrap a key produced by [`wrap_key`].
pub fn unwrap_key(wrapped: &[u8], kek: &[u8], iv: &[u8], tag: &[u8]) -> Result<SymmetricKey> {
    let bytes = decrypt(wrapped, kek, iv, tag, Some(KEY_WRAP_CONTEXT))?;
    SymmetricKey::from_slice(&bytes)
}

/// Derive a key from a password with PBKDF2-HMAC-SHA256.
///
/// Returns the key and the salt used. Without a salt a fresh random one is
/// generated, so the result is only repeatable if the salt is persisted.
pub fn derive_key(
    password: &[u8],
    salt: Option<&[u8]>,
    iterations: u32,
) -> Result<(SymmetricKey, Vec<u8>)> {
    if iterations == 0 {
        return Err(CryptoError::InvalidIterations);
    }

    let salt = match salt {
        Some(s) => s.to_vec(),
        None => {
            let mut s = vec![0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut s);
            s
        }
    };

    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password, &salt, iterations, &mut key);
    Ok((SymmetricKey(key), salt))
}
