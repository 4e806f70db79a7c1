//! Packed envelope framing.
//!
//! One encrypted unit is persisted as a flat byte string:
//!
//! ```text
//! [ iv (12) ][ auth tag (16) ][ ciphertext (N) ]
//! ```

use crate::crypto::{AuthTag, Iv, IV_LEN, TAG_LEN};
use crate::error::{CryptoError, Result};

/// Bytes preceding the ciphertext.
pub const ENVELOPE_HEADER_LEN: usize = IV_LEN + TAG_LEN;

/// Pack an IV, tag and ciphertext into an envelope.
pub fn pack_envelope(iv: &Iv, tag: &AuthTag, ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + ciphertext.len());
    out.extend_from_slice(iv.as_bytes());
    out.extend_from_slice(tag.as_bytes());
    out.extend_from_slice(ciphertext);
    out
}

/// Split an envelope into its IV, tag and ciphertext.
pub fn unpack_envelope(bytes: &[u8]) -> Result<(Iv, AuthTag, Vec<u8>)> {
    if bytes.len() < ENVELOPE_HEADER_LEN {
        return Err(CryptoError::EnvelopeTooShort { len: bytes.len() });
    }

    let (iv_bytes, rest) = bytes.split_at(IV_LEN);
    let (tag_bytes, ciphertext) = rest.split_at(TAG_LEN);

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(iv_bytes);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(tag_bytes);

    Ok((Iv(iv), AuthTag(tag), ciphertext.to_vec()))
}
