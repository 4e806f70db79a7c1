//! Golden vectors.
//!
//! Known inputs and outputs for the primitives whose bytes other systems
//! depend on: content hashes land on the ledger, derived keys must match
//! what another client derives from the same password, and envelopes are
//! opened by whoever holds the key.

use carevault_core::{decrypt, derive_key, encrypt, hash_hex, pack_envelope, unpack_envelope};

/// SHA-256 vector.
#[derive(Debug, Clone)]
pub struct HashVector {
    pub name: &'static str,
    pub input: &'static [u8],
    pub digest_hex: &'static str,
}

/// PBKDF2-HMAC-SHA256 vector (32-byte output).
#[derive(Debug, Clone)]
pub struct KdfVector {
    pub name: &'static str,
    pub password: &'static [u8],
    pub salt: &'static [u8],
    pub iterations: u32,
    pub key_hex: &'static str,
}

/// ChaCha20-Poly1305 vector with detached tag.
#[derive(Debug, Clone)]
pub struct AeadVector {
    pub name: &'static str,
    pub key_hex: &'static str,
    pub iv_hex: &'static str,
    pub aad_hex: &'static str,
    pub plaintext: &'static [u8],
    pub ciphertext_hex: &'static str,
    pub tag_hex: &'static str,
}

pub fn hash_vectors() -> Vec<HashVector> {
    vec![
        HashVector {
            name: "empty",
            input: b"",
            digest_hex: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        },
        HashVector {
            name: "test",
            input: b"test",
            digest_hex: "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08",
        },
        HashVector {
            name: "fhir_patient",
            input: br#"{"resourceType":"Patient","id":"patient-001"}"#,
            digest_hex: "56306f56fbfdc39229f4cedf69cc5b44c4de70351dabe78bdf3aab6037d6558b",
        },
    ]
}

pub fn kdf_vectors() -> Vec<KdfVector> {
    vec![
        KdfVector {
            name: "password_salt_1",
            password: b"password",
            salt: b"salt",
            iterations: 1,
            key_hex: "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b",
        },
        KdfVector {
            name: "password_salt_2",
            password: b"password",
            salt: b"salt",
            iterations: 2,
            key_hex: "ae4d0c95af6b46d32d0adff928f06dd02a303f8ef3c251dfd6e2d85a95474c43",
        },
        KdfVector {
            name: "password_salt_4096",
            password: b"password",
            salt: b"salt",
            iterations: 4096,
            key_hex: "c5e478d59288c841aa530db6845c4c8d962893a001ce4e11a4963873aa98134a",
        },
        KdfVector {
            name: "passphrase_1000",
            password: b"correct horse battery staple",
            salt: b"carevault-salt-01",
            iterations: 1000,
            key_hex: "01c13db05f0858235fb9b0124a3bca9f50e6dd1c529b3314c67b424714a0e52c",
        },
    ]
}

pub fn aead_vectors() -> Vec<AeadVector> {
    vec![AeadVector {
        name: "rfc8439_2_8_2",
        key_hex: "808182838485868788898a8b8c8d8e8f909192939495969798999a9b9c9d9e9f",
        iv_hex: "070000004041424344454647",
        aad_hex: "50515253c0c1c2c3c4c5c6c7",
        plaintext: b"Ladies and Gentlemen of the class of '99: If I could offer you only one tip for the future, sunscreen would be it.",
        ciphertext_hex: "d31a8d34648e60db7b86afbc53ef7ec2a4aded51296e08fea9e2b5a736ee62d63dbea45e8ca9671282fafb69da92728b1a71de0a9e060b2905d6a5b67ecd3b3692ddbd7f2d778b8c9803aee328091b58fab324e4fad675945585808b4831d7bc3ff4def08e4b7a9de576d26586cec64b6116",
        tag_hex: "1ae10b594f09e26a7e902ecbd0600691",
    }]
}

fn unhex(name: &str, s: &str) -> Result<Vec<u8>, String> {
    hex::decode(s).map_err(|e| format!("{}: bad hex: {}", name, e))
}

/// Check one AEAD vector in both directions and through the envelope.
pub fn verify_aead_vector(v: &AeadVector) -> Result<(), String> {
    let key = unhex(v.name, v.key_hex)?;
    let iv = unhex(v.name, v.iv_hex)?;
    let aad = unhex(v.name, v.aad_hex)?;

    let sealed = encrypt(v.plaintext, &key, Some(&iv), Some(&aad)).map_err(|e| format!("{}: {}", v.name, e))?;
    if hex::encode(&sealed.ciphertext) != v.ciphertext_hex {
        return Err(format!("{}: ciphertext mismatch", v.name));
    }
    if hex::encode(sealed.tag.as_bytes()) != v.tag_hex {
        return Err(format!("{}: tag mismatch", v.name));
    }

    let envelope = pack_envelope(&sealed.iv, &sealed.tag, &sealed.ciphertext);
    let (iv2, tag2, ct2) = unpack_envelope(&envelope).map_err(|e| format!("{}: {}", v.name, e))?;
    let opened = decrypt(&ct2, &key, iv2.as_bytes(), tag2.as_bytes(), Some(&aad))
        .map_err(|e| format!("{}: {}", v.name, e))?;
    if opened != v.plaintext {
        return Err(format!("{}: plaintext mismatch", v.name));
    }
    Ok(())
}

/// Check every vector. Returns the first mismatch.
pub fn verify_all_vectors() -> Result<(), String> {
    for v in hash_vectors() {
        if hash_hex(v.input) != v.digest_hex {
            return Err(format!("hash {}: digest mismatch", v.name));
        }
    }
    for v in kdf_vectors() {
        let (key, salt) = derive_key(v.password, Some(v.salt), v.iterations)
            .map_err(|e| format!("kdf {}: {}", v.name, e))?;
        if salt != v.salt {
            return Err(format!("kdf {}: salt not echoed", v.name));
        }
        if hex::encode(key.as_bytes()) != v.key_hex {
            return Err(format!("kdf {}: key mismatch", v.name));
        }
    }
    for v in aead_vectors() {
        verify_aead_vector(&v)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors() {
        verify_all_vectors().unwrap();
    }

    #[test]
    fn test_tampered_vector_fails() {
        let mut v = aead_vectors().remove(0);
        v.tag_hex = "00e10b594f09e26a7e902ecbd0600691";
        assert!(verify_aead_vector(&v).is_err());
    }
}
