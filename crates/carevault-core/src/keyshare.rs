//! Key sharing via X25519 key agreement.
//!
//! A [`SealedKey`] carries a symmetric key encrypted to one recipient's X25519
//! public key. The sender uses a one-time ephemeral key pair, derives a
//! wrapping key from the shared secret and a caller-supplied context, and
//! seals the symmetric key with ChaCha20-Poly1305.

use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::crypto::{decrypt, encrypt, SymmetricKey};
use crate::envelope::{pack_envelope, unpack_envelope};
use crate::error::{CryptoError, Result};

const KDF_CONTEXT: &str = "carevault-keyshare-v1 wrapping key";

/// An X25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidEncoding("public key must be 32 bytes".into()))?;
        Ok(Self(arr))
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// An X25519 static secret key.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::thread_rng()))
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Export the secret bytes (for storage in a secret store only).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Derive the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    /// Perform key agreement with a peer's public key.
    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.0.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a wrapping key for a specific context.
    pub fn derive_key(&self, context: &[u8]) -> SymmetricKey {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT);
        hasher.update(&self.0);
        hasher.update(context);
        SymmetricKey::from_bytes(*hasher.finalize().as_bytes())
    }
}

/// Ephemeral key pair for one-time key agreement.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new ephemeral key pair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Perform key agreement. Consumes the ephemeral secret.
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.secret.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}

/// A symmetric key sealed to one X25519 recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedKey {
    /// Sender's ephemeral public key.
    pub ephemeral_public: X25519PublicKey,

    /// `[iv][tag][encrypted key]` envelope.
    pub envelope: Vec<u8>,
}

impl SealedKey {
    /// Seal `key` to `recipient`, binding the result to `context`.
    pub fn seal(key: &SymmetricKey, recipient: &X25519PublicKey, context: &[u8]) -> Result<Self> {
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let wrap_key = ephemeral.diffie_hellman(recipient).derive_key(context);

        let sealed = encrypt(key.as_bytes(), wrap_key.as_bytes(), None, Some(context))?;

        Ok(Self {
            ephemeral_public,
            envelope: pack_envelope(&sealed.iv, &sealed.tag, &sealed.ciphertext),
        })
    }

    /// Open with the recipient's secret. The context must match the one used to seal.
    pub fn open(&self, recipient_secret: &X25519StaticSecret, context: &[u8]) -> Result<SymmetricKey> {
        let wrap_key = recipient_secret
            .diffie_hellman(&self.ephemeral_public)
            .derive_key(context);

        let (iv, tag, ciphertext) = unpack_envelope(&self.envelope)?;
        let key_bytes = decrypt(
            &ciphertext,
            wrap_key.as_bytes(),
            iv.as_bytes(),
            tag.as_bytes(),
            Some(context),
        )?;
        SymmetricKey::from_slice(&key_bytes)
    }

    /// Serialize as `[ephemeral public (32)][envelope]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.envelope.len());
        out.extend_from_slice(self.ephemeral_public.as_bytes());
        out.extend_from_slice(&self.envelope);
        out
    }

    /// Parse the [`SealedKey::to_bytes`] layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 32 {
            return Err(CryptoError::EnvelopeTooShort { len: bytes.len() });
        }
        let (public, envelope) = bytes.split_at(32);
        let mut arr = [0u8; 32];
        arr.copy_from_slice(public);
        Ok(Self {
            ephemeral_public: X25519PublicKey(arr),
            envelope: envelope.to_vec(),
        })
    }
}
