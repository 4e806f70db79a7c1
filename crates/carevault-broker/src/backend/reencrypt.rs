//! Proxy re-encryption service.
//!
//! The protocol has five calls: `prepare` registers a party's key pair,
//! `encrypt` produces a capsule plus ciphertext for an owner, `rekey`
//! delegates from owner to recipient with an expiry, `reencrypt` turns a
//! capsule into capsule fragments for the recipient, and `decrypt` lets the
//! recipient open the ciphertext using those fragments.
//!
//! [`MemoryReencryptionService`] models capsules with X25519 key shares: a
//! capsule is the data key sealed to the owner, a fragment is the same key
//! resealed to the recipient. The service holds every party's secret, the
//! way a vault-backed deployment would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use carevault_core::{
    now_secs, unpack_envelope, CryptoError, OrgId, SealedKey, SymmetricKey, X25519StaticSecret,
};

use super::{BackendError, BackendResult};

const CAPSULE_CONTEXT: &[u8] = b"carevault/capsule/v1";

fn cfrag_context(owner: &str, recipient: &str) -> Vec<u8> {
    format!("carevault/cfrag/v1\0{}\0{}", owner, recipient).into_bytes()
}

/// Public half of a prepared party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub owner_id: String,
    /// Hex X25519 public key.
    pub public_key: String,
    /// False if the party was already registered.
    pub created: bool,
}

fn default_one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyRequest {
    pub owner_id: String,
    pub recipient_id: String,
    pub resource_id: String,
    /// Epoch seconds; must be in the future.
    pub expiry: i64,
    #[serde(default = "default_one")]
    pub threshold: u32,
    #[serde(default = "default_one")]
    pub shares: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyResponse {
    pub rekey_id: String,
    pub owner_id: String,
    pub recipient_id: String,
    pub resource_id: String,
    pub expiry: i64,
    pub threshold: u32,
    pub shares: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReencryptRequest {
    pub rekey_id: String,
    /// Base64 capsule.
    pub capsule: String,
    /// Base64 ciphertext, passed through untouched.
    pub ciphertext: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReencryptResponse {
    pub rekey_id: String,
    /// Base64 capsule fragments, one per share.
    pub cfrags: Vec<String>,
    pub capsule: String,
    pub ciphertext: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptRequest {
    pub owner_id: String,
    /// Base64 plaintext.
    pub plaintext: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptResponse {
    pub capsule: String,
    pub ciphertext: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptRequest {
    pub recipient_id: String,
    pub owner_id: String,
    pub capsule: String,
    pub ciphertext: String,
    pub cfrags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptResponse {
    /// Base64 plaintext.
    pub plaintext: String,
}

/// Re-encryption service interface.
#[async_trait]
pub trait ReencryptionService: Send + Sync {
    /// Register a party, or return its existing public key.
    async fn prepare(&self, owner_id: &str) -> BackendResult<PrepareResponse>;

    /// Encrypt to an owner.
    async fn encrypt(&self, request: EncryptRequest) -> BackendResult<EncryptResponse>;

    /// Delegate from owner to recipient until `expiry`.
    async fn rekey(&self, request: RekeyRequest) -> BackendResult<RekeyResponse>;

    /// Transform a capsule under a rekey.
    async fn reencrypt(&self, request: ReencryptRequest) -> BackendResult<ReencryptResponse>;

    /// Open a re-encrypted ciphertext as the recipient.
    async fn decrypt(&self, request: DecryptRequest) -> BackendResult<DecryptResponse>;
}

struct RekeyRecord {
    owner_id: String,
    recipient_id: String,
    expiry: i64,
    shares: u32,
}

#[derive(Default)]
struct Inner {
    parties: HashMap<String, [u8; 32]>,
    rekeys: HashMap<String, RekeyRecord>,
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// In-process re-encryption service.
pub struct MemoryReencryptionService {
    inner: RwLock<Inner>,
    available: AtomicBool,
    clock: Clock,
}

impl Default for MemoryReencryptionService {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
            clock: Arc::new(now_secs),
        }
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> BackendError {
    BackendError::Unavailable(format!("lock poisoned: {}", e))
}

fn party_id(raw: &str) -> BackendResult<String> {
    OrgId::parse(raw)
        .map(String::from)
        .map_err(|e| BackendError::InvalidInput(e.to_string()))
}

fn decode(field: &str, value: &str) -> BackendResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| BackendError::InvalidInput(format!("{} is not base64: {}", field, e)))
}

impl MemoryReencryptionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the time source used for rekey expiry.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Simulate an outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live rekeys.
    pub fn rekey_count(&self) -> usize {
        self.inner.read().map(|i| i.rekeys.len()).unwrap_or(0)
    }

    fn check_available(&self) -> BackendResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("re-encryption service is down".into()))
        }
    }

    fn secret_of(&self, id: &str, role: &str) -> BackendResult<X25519StaticSecret> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .parties
            .get(id)
            .map(|bytes| X25519StaticSecret::from_bytes(*bytes))
            .ok_or_else(|| BackendError::NotFound(format!("{} {} not found", role, id)))
    }
}

#[async_trait]
impl ReencryptionService for MemoryReencryptionService {
    async fn prepare(&self, owner_id: &str) -> BackendResult<PrepareResponse> {
        self.check_available()?;
        let owner_id = party_id(owner_id)?;

        let mut inner = self.inner.write().map_err(poisoned)?;
        if let Some(bytes) = inner.parties.get(&owner_id) {
            let public_key = X25519StaticSecret::from_bytes(*bytes).public_key().to_hex();
            return Ok(PrepareResponse {
                owner_id,
                public_key,
                created: false,
            });
        }

        let secret = X25519StaticSecret::generate();
        let public_key = secret.public_key().to_hex();
        inner.parties.insert(owner_id.clone(), secret.to_bytes());

        info!(%owner_id, "re-encryption party registered");
        Ok(PrepareResponse {
            owner_id,
            public_key,
            created: true,
        })
    }

    async fn encrypt(&self, request: EncryptRequest) -> BackendResult<EncryptResponse> {
        self.check_available()?;
        let owner_id = party_id(&request.owner_id)?;
        let owner_public = self.secret_of(&owner_id, "owner")?.public_key();
        let plaintext = decode("plaintext", &request.plaintext)?;

        let data_key = SymmetricKey::generate();
        let capsule = SealedKey::seal(&data_key, &owner_public, CAPSULE_CONTEXT)?;
        let ciphertext = data_key.encrypt(&plaintext, None)?.to_envelope();

        Ok(EncryptResponse {
            capsule: BASE64.encode(capsule.to_bytes()),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    async fn rekey(&self, request: RekeyRequest) -> BackendResult<RekeyResponse> {
        self.check_available()?;
        let owner_id = party_id(&request.owner_id)?;
        let recipient_id = party_id(&request.recipient_id)?;

        if request.expiry <= (self.clock)() {
            return Err(BackendError::InvalidInput("rekey expiry must be in the future".into()));
        }
        if request.threshold == 0 || request.shares == 0 {
            return Err(BackendError::InvalidInput("threshold and shares must be at least 1".into()));
        }
        if request.threshold > request.shares {
            return Err(BackendError::InvalidInput("threshold cannot exceed shares".into()));
        }

        let mut inner = self.inner.write().map_err(poisoned)?;
        if !inner.parties.contains_key(&owner_id) {
            return Err(BackendError::NotFound(format!("owner {} not found", owner_id)));
        }
        if !inner.parties.contains_key(&recipient_id) {
            return Err(BackendError::NotFound(format!("recipient {} not found", recipient_id)));
        }

        let mut id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id);
        let rekey_id = hex::encode(id);

        inner.rekeys.insert(
            rekey_id.clone(),
            RekeyRecord {
                owner_id: owner_id.clone(),
                recipient_id: recipient_id.clone(),
                expiry: request.expiry,
                shares: request.shares,
            },
        );

        info!(
            %rekey_id,
            owner = %owner_id,
            recipient = %recipient_id,
            resource_id = %request.resource_id,
            expiry = request.expiry,
            "rekey generated"
        );
        Ok(RekeyResponse {
            rekey_id,
            owner_id,
            recipient_id,
            resource_id: request.resource_id,
            expiry: request.expiry,
            threshold: request.threshold,
            shares: request.shares,
        })
    }

    async fn reencrypt(&self, request: ReencryptRequest) -> BackendResult<ReencryptResponse> {
        self.check_available()?;

        let (owner_id, recipient_id, shares) = {
            let mut inner = self.inner.write().map_err(poisoned)?;
            let Some(record) = inner.rekeys.get(&request.rekey_id) else {
                return Err(BackendError::NotFound(format!("rekey {} not found", request.rekey_id)));
            };
            if (self.clock)() > record.expiry {
                inner.rekeys.remove(&request.rekey_id);
                return Err(BackendError::Expired(format!("rekey {} has expired", request.rekey_id)));
            }
            (record.owner_id.clone(), record.recipient_id.clone(), record.shares)
        };

        let capsule = SealedKey::from_bytes(&decode("capsule", &request.capsule)?)
            .map_err(|e| BackendError::InvalidInput(format!("invalid capsule: {}", e)))?;
        let data_key = capsule.open(&self.secret_of(&owner_id, "owner")?, CAPSULE_CONTEXT)?;
        let recipient_public = self.secret_of(&recipient_id, "recipient")?.public_key();

        let context = cfrag_context(&owner_id, &recipient_id);
        let cfrags = (0..shares)
            .map(|_| {
                SealedKey::seal(&data_key, &recipient_public, &context)
                    .map(|frag| BASE64.encode(frag.to_bytes()))
            })
            .collect::<Result<Vec<_>, CryptoError>>()?;

        debug!(rekey_id = %request.rekey_id, cfrags = cfrags.len(), "re-encryption performed");
        Ok(ReencryptResponse {
            rekey_id: request.rekey_id,
            cfrags,
            capsule: request.capsule,
            ciphertext: request.ciphertext,
        })
    }

    async fn decrypt(&self, request: DecryptRequest) -> BackendResult<DecryptResponse> {
        self.check_available()?;
        let recipient_id = party_id(&request.recipient_id)?;
        let owner_id = party_id(&request.owner_id)?;

        let recipient_secret = self.secret_of(&recipient_id, "recipient")?;
        self.secret_of(&owner_id, "owner")?;

        if request.cfrags.is_empty() {
            return Err(BackendError::InvalidInput("at least one cfrag is required".into()));
        }

        let context = cfrag_context(&owner_id, &recipient_id);
        let mut data_key = None;
        for cfrag in &request.cfrags {
            let frag = SealedKey::from_bytes(&decode("cfrag", cfrag)?)
                .map_err(|e| BackendError::InvalidInput(format!("invalid cfrag: {}", e)))?;
            if let Ok(key) = frag.open(&recipient_secret, &context) {
                data_key = Some(key);
                break;
            }
        }
        let data_key = data_key.ok_or(CryptoError::AuthenticationFailed)?;

        let ciphertext = decode("ciphertext", &request.ciphertext)?;
        let (iv, tag, ct) = unpack_envelope(&ciphertext)?;
        let plaintext = carevault_core::decrypt(&ct, data_key.as_bytes(), iv.as_bytes(), tag.as_bytes(), None)?;

        Ok(DecryptResponse {
            plaintext: BASE64.encode(plaintext),
        })
    }
}
