//! Ledger client interface and its in-process implementation.
//!
//! A ledger is driven through two untyped calls, `submit` (state-changing,
//! runs as a transaction) and `evaluate` (read-only), both taking a function
//! name and positional string arguments and answering with JSON.
//! [`ConsentClient`] puts a typed face on any [`LedgerClient`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use carevault_core::now_secs;

use crate::contract::{ConsentContract, NewResource, TxContext};
use crate::decision::AccessDecision;
use crate::error::{LedgerError, Result};
use crate::events::LedgerEvent;
use crate::memory::MemoryStateStore;
use crate::model::{AccessGrant, AuditLogEntry, Organization, Resource};
use crate::sqlite::SqliteStateStore;
use crate::state::StateStore;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State-changing contract functions.
pub const SUBMIT_FUNCTIONS: &[&str] = &[
    "registerOrg",
    "uploadMeta",
    "grantAccess",
    "revokeAccess",
    "logAccess",
    "revokeOrg",
    "reinstateOrg",
];

/// Read-only contract functions.
pub const EVALUATE_FUNCTIONS: &[&str] = &[
    "queryResource",
    "queryOrg",
    "checkAccess",
    "queryAccess",
    "getAuditTrail",
    "listResourcesByOwner",
];

/// Untyped ledger interface.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Run a state-changing function as a transaction.
    ///
    /// Answers `{"txId", "timestamp", "result", "events"}`.
    async fn submit(&self, function: &str, args: &[String]) -> Result<Value>;

    /// Run a read-only function. Answers the function's result directly.
    async fn evaluate(&self, function: &str, args: &[String]) -> Result<Value>;

    /// Subscribe to contract events, if this ledger publishes them.
    fn subscribe(&self) -> Option<broadcast::Receiver<LedgerEvent>> {
        None
    }
}

/// Which world-state store backs a [`LocalLedger`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
}

/// Open an in-process ledger on the configured backend.
pub fn open_local(backend: &LedgerBackend) -> Result<Arc<dyn LedgerClient>> {
    match backend {
        LedgerBackend::Memory => Ok(Arc::new(LocalLedger::new(Arc::new(MemoryStateStore::new())))),
        LedgerBackend::Sqlite { path } => {
            let store = SqliteStateStore::open(path)?;
            Ok(Arc::new(LocalLedger::new(Arc::new(store))))
        }
    }
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// In-process ledger: the consent contract over a local state store.
///
/// Writers are serialized by an async lock; readers never take it.
pub struct LocalLedger<S: StateStore + ?Sized> {
    contract: ConsentContract<S>,
    write_lock: Mutex<()>,
    events: broadcast::Sender<LedgerEvent>,
    clock: Clock,
}

impl<S: StateStore + ?Sized> LocalLedger<S> {
    pub fn new(state: Arc<S>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            contract: ConsentContract::new(state),
            write_lock: Mutex::new(()),
            events,
            clock: Arc::new(now_secs),
        }
    }

    /// Replace the time source used for transaction timestamps and access
    /// checks.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn contract(&self) -> &ConsentContract<S> {
        &self.contract
    }

    fn new_tx(&self) -> TxContext {
        let mut tx = TxContext::generate();
        tx.timestamp = (self.clock)();
        tx
    }

    async fn run_submit(&self, tx: &mut TxContext, function: &str, args: &[String]) -> Result<Value> {
        let c = &self.contract;
        let value = match function {
            "registerOrg" => {
                let org_id = arg(function, args, 0, "orgId")?;
                let metadata = match args.get(1).map(|s| s.trim()).filter(|s| !s.is_empty()) {
                    Some(raw) => serde_json::from_str(raw).map_err(|e| LedgerError::InvalidArguments {
                        function: function.into(),
                        reason: format!("metadata is not JSON: {}", e),
                    })?,
                    None => Value::Null,
                };
                to_json(c.register_org(tx, org_id, metadata).await?)?
            }
            "uploadMeta" => {
                let new = NewResource {
                    resource_id: arg(function, args, 0, "resourceId")?,
                    owner_org_id: arg(function, args, 1, "ownerOrgId")?,
                    content_id: arg(function, args, 2, "contentId")?,
                    content_hash: arg(function, args, 3, "contentHash")?,
                    resource_type: arg(function, args, 4, "resourceType")?,
                };
                to_json(c.upload_meta(tx, new).await?)?
            }
            "grantAccess" => {
                let resource_id = arg(function, args, 0, "resourceId")?;
                let org_id = arg(function, args, 1, "granteeOrgId")?;
                let access_type = arg(function, args, 2, "accessType")?;
                let expiry = int_arg(function, args, 3, "expiryTimestamp")?;
                to_json(c.grant_access(tx, resource_id, org_id, access_type, expiry).await?)?
            }
            "revokeAccess" => {
                let resource_id = arg(function, args, 0, "resourceId")?;
                let org_id = arg(function, args, 1, "granteeOrgId")?;
                to_json(c.revoke_access(tx, resource_id, org_id).await?)?
            }
            "logAccess" => {
                let resource_id = arg(function, args, 0, "resourceId")?;
                let actor = arg(function, args, 1, "actorOrgId")?;
                let action = arg(function, args, 2, "action")?;
                let at = match args.get(3) {
                    Some(_) => int_arg(function, args, 3, "accessTimestamp")?,
                    None => tx.timestamp,
                };
                to_json(c.log_access(tx, resource_id, actor, action, at).await?)?
            }
            "revokeOrg" => {
                let org_id = arg(function, args, 0, "orgId")?;
                let reason = args.get(1).map(String::as_str);
                to_json(c.revoke_org(tx, org_id, reason).await?)?
            }
            "reinstateOrg" => {
                let org_id = arg(function, args, 0, "orgId")?;
                to_json(c.reinstate_org(tx, org_id).await?)?
            }
            _ if EVALUATE_FUNCTIONS.contains(&function) => self.run_evaluate(function, args).await?,
            _ => return Err(LedgerError::UnknownFunction(function.into())),
        };
        Ok(value)
    }

    async fn run_evaluate(&self, function: &str, args: &[String]) -> Result<Value> {
        let c = &self.contract;
        match function {
            "queryResource" => to_json(c.query_resource(arg(function, args, 0, "resourceId")?).await?),
            "queryOrg" => to_json(c.query_org(arg(function, args, 0, "orgId")?).await?),
            "checkAccess" => {
                let resource_id = arg(function, args, 0, "resourceId")?;
                let org_id = arg(function, args, 1, "orgId")?;
                let now = match args.get(2) {
                    Some(_) => int_arg(function, args, 2, "now")?,
                    None => (self.clock)(),
                };
                to_json(c.check_access(resource_id, org_id, now).await?)
            }
            "queryAccess" => {
                let resource_id = arg(function, args, 0, "resourceId")?;
                let org_id = arg(function, args, 1, "orgId")?;
                to_json(c.query_access(resource_id, org_id).await?)
            }
            "getAuditTrail" => to_json(c.audit_trail(arg(function, args, 0, "resourceId")?).await?),
            "listResourcesByOwner" => {
                to_json(c.resources_by_owner(arg(function, args, 0, "orgId")?).await?)
            }
            _ if SUBMIT_FUNCTIONS.contains(&function) => {
                Err(LedgerError::NotReadOnly(function.into()))
            }
            _ => Err(LedgerError::UnknownFunction(function.into())),
        }
    }
}

fn arg<'a>(function: &str, args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| LedgerError::InvalidArguments {
            function: function.into(),
            reason: format!("missing argument {} ({})", index, name),
        })
}

fn int_arg(function: &str, args: &[String], index: usize, name: &str) -> Result<i64> {
    let raw = arg(function, args, index, name)?;
    raw.trim().parse().map_err(|_| LedgerError::InvalidArguments {
        function: function.into(),
        reason: format!("{} must be an integer, got {:?}", name, raw),
    })
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[async_trait]
impl<S: StateStore + ?Sized + 'static> LedgerClient for LocalLedger<S> {
    async fn submit(&self, function: &str, args: &[String]) -> Result<Value> {
        let _guard = self.write_lock.lock().await;

        let mut tx = self.new_tx();
        let result = self.run_submit(&mut tx, function, args).await;
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                debug!(function, tx_id = %tx.tx_id, error = %e, "transaction rejected");
                return Err(e);
            }
        };

        let tx_id = tx.tx_id.clone();
        let timestamp = tx.timestamp;
        let events = tx.into_events();
        for event in &events {
            // No subscribers is fine.
            let _ = self.events.send(event.clone());
        }

        Ok(json!({
            "txId": tx_id,
            "timestamp": timestamp,
            "result": result,
            "events": events,
        }))
    }

    async fn evaluate(&self, function: &str, args: &[String]) -> Result<Value> {
        self.run_evaluate(function, args).await
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<LedgerEvent>> {
        Some(self.events.subscribe())
    }
}

/// A committed transaction and its typed result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted<T> {
    pub tx_id: String,
    pub timestamp: i64,
    pub result: T,
    #[serde(default)]
    pub events: Vec<LedgerEvent>,
}

/// Typed consent-contract calls over any [`LedgerClient`].
pub struct ConsentClient {
    ledger: Arc<dyn LedgerClient>,
}

impl Clone for ConsentClient {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
        }
    }
}

impl ConsentClient {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// The untyped client underneath.
    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    async fn submit<T: DeserializeOwned>(&self, function: &str, args: Vec<String>) -> Result<Submitted<T>> {
        let value = self.ledger.submit(function, &args).await?;
        serde_json::from_value(value).map_err(|e| {
            warn!(function, error = %e, "undecodable submit response");
            LedgerError::Serialization(e)
        })
    }

    async fn evaluate<T: DeserializeOwned>(&self, function: &str, args: Vec<String>) -> Result<T> {
        let value = self.ledger.evaluate(function, &args).await?;
        serde_json::from_value(value).map_err(|e| {
            warn!(function, error = %e, "undecodable evaluate response");
            LedgerError::Serialization(e)
        })
    }

    pub async fn register_org(&self, org_id: &str, metadata: &Value) -> Result<Submitted<Organization>> {
        self.submit("registerOrg", vec![org_id.into(), metadata.to_string()])
            .await
    }

    pub async fn upload_meta(&self, new: NewResource<'_>) -> Result<Submitted<Resource>> {
        self.submit(
            "uploadMeta",
            vec![
                new.resource_id.into(),
                new.owner_org_id.into(),
                new.content_id.into(),
                new.content_hash.into(),
                new.resource_type.into(),
            ],
        )
        .await
    }

    pub async fn grant_access(
        &self,
        resource_id: &str,
        grantee_org_id: &str,
        access_type: &str,
        expiry_timestamp: i64,
    ) -> Result<Submitted<AccessGrant>> {
        self.submit(
            "grantAccess",
            vec![
                resource_id.into(),
                grantee_org_id.into(),
                access_type.into(),
                expiry_timestamp.to_string(),
            ],
        )
        .await
    }

    pub async fn revoke_access(&self, resource_id: &str, grantee_org_id: &str) -> Result<Submitted<AccessGrant>> {
        self.submit("revokeAccess", vec![resource_id.into(), grantee_org_id.into()])
            .await
    }

    pub async fn log_access(
        &self,
        resource_id: &str,
        actor_org_id: &str,
        action: &str,
        access_timestamp: i64,
    ) -> Result<Submitted<AuditLogEntry>> {
        self.submit(
            "logAccess",
            vec![
                resource_id.into(),
                actor_org_id.into(),
                action.into(),
                access_timestamp.to_string(),
            ],
        )
        .await
    }

    pub async fn revoke_org(&self, org_id: &str, reason: Option<&str>) -> Result<Submitted<Organization>> {
        let mut args = vec![org_id.to_string()];
        if let Some(reason) = reason {
            args.push(reason.to_string());
        }
        self.submit("revokeOrg", args).await
    }

    pub async fn reinstate_org(&self, org_id: &str) -> Result<Submitted<Organization>> {
        self.submit("reinstateOrg", vec![org_id.into()]).await
    }

    pub async fn query_resource(&self, resource_id: &str) -> Result<Resource> {
        self.evaluate("queryResource", vec![resource_id.into()]).await
    }

    pub async fn query_org(&self, org_id: &str) -> Result<Organization> {
        self.evaluate("queryOrg", vec![org_id.into()]).await
    }

    /// `checkAccess` at the ledger's current time.
    pub async fn check_access(&self, resource_id: &str, org_id: &str) -> Result<AccessDecision> {
        self.evaluate("checkAccess", vec![resource_id.into(), org_id.into()])
            .await
    }

    pub async fn query_access(&self, resource_id: &str, org_id: &str) -> Result<Option<AccessGrant>> {
        self.evaluate("queryAccess", vec![resource_id.into(), org_id.into()])
            .await
    }

    pub async fn audit_trail(&self, resource_id: &str) -> Result<Vec<AuditLogEntry>> {
        self.evaluate("getAuditTrail", vec![resource_id.into()]).await
    }

    pub async fn resources_by_owner(&self, org_id: &str) -> Result<Vec<Resource>> {
        self.evaluate("listResourcesByOwner", vec![org_id.into()])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DenialReason;
    use crate::error::ContractError;
    use crate::events::EventType;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn local() -> Arc<LocalLedger<MemoryStateStore>> {
        Arc::new(LocalLedger::new(Arc::new(MemoryStateStore::new())))
    }

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    async fn seed(client: &ConsentClient) {
        client
            .register_org("hospital-001", &json!({"name": "General Hospital"}))
            .await
            .unwrap();
        client.register_org("lab-001", &Value::Null).await.unwrap();
        client
            .upload_meta(NewResource {
                resource_id: "patient-001",
                owner_org_id: "hospital-001",
                content_id: "cid",
                content_hash: "ab",
                resource_type: "fhir-json",
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_submit_envelope() {
        let ledger = local();
        let value = ledger
            .submit("registerOrg", &args(&["Hospital-001", r#"{"name":"H"}"#]))
            .await
            .unwrap();

        assert_eq!(value["txId"].as_str().unwrap().len(), 64);
        assert_eq!(value["result"]["orgId"], "hospital-001");
        assert_eq!(value["result"]["metadata"]["name"], "H");
        assert_eq!(value["events"][0]["eventType"], "OrgRegistered");
    }

    #[tokio::test]
    async fn test_unknown_and_misrouted_functions() {
        let ledger = local();
        assert!(matches!(
            ledger.submit("deleteEverything", &[]).await,
            Err(LedgerError::UnknownFunction(_))
        ));
        assert!(matches!(
            ledger.evaluate("revokeOrg", &args(&["x"])).await,
            Err(LedgerError::NotReadOnly(_))
        ));
        assert!(matches!(
            ledger.submit("grantAccess", &args(&["r"])).await,
            Err(LedgerError::InvalidArguments { .. })
        ));
        assert!(matches!(
            ledger
                .submit("grantAccess", &args(&["r", "o", "read", "soon"]))
                .await,
            Err(LedgerError::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn test_typed_client_scenarios() {
        let client = ConsentClient::new(local());
        seed(&client).await;

        let owner = client.check_access("patient-001", "hospital-001").await.unwrap();
        assert!(owner.has_access && owner.is_owner);

        let grant = client
            .grant_access("patient-001", "lab-001", "read", now_secs() + 86_400)
            .await
            .unwrap();
        assert_eq!(grant.events[0].event_type, EventType::AccessGranted);

        let lab = client.check_access("patient-001", "LAB-001").await.unwrap();
        assert!(lab.has_access);
        assert!(!lab.is_owner);

        let revoked = client.revoke_org("lab-001", Some("compromised")).await.unwrap();
        assert!(revoked.result.is_revoked);
        assert_eq!(revoked.tx_id.len(), 64);

        let lab = client.check_access("patient-001", "lab-001").await.unwrap();
        assert_eq!(lab.reason, Some(DenialReason::OrganizationRevoked));
    }

    #[tokio::test]
    async fn test_contract_errors_pass_through() {
        let client = ConsentClient::new(local());
        let err = client.query_resource("missing").await.unwrap_err();
        assert!(err.is_resource_not_found());

        let err = client.reinstate_org("ghost").await.unwrap_err();
        assert!(matches!(err, LedgerError::Contract(ContractError::OrgNotFound(_))));
    }

    #[tokio::test]
    async fn test_query_access_none() {
        let client = ConsentClient::new(local());
        seed(&client).await;
        assert!(client.query_access("patient-001", "lab-001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clock_drives_expiry() {
        let now = Arc::new(AtomicI64::new(1_000));
        let clock = now.clone();
        let ledger = Arc::new(
            LocalLedger::new(Arc::new(MemoryStateStore::new()))
                .with_clock(move || clock.load(Ordering::SeqCst)),
        );
        let client = ConsentClient::new(ledger);
        seed(&client).await;
        client.grant_access("patient-001", "lab-001", "read", 1_100).await.unwrap();

        assert!(client.check_access("patient-001", "lab-001").await.unwrap().has_access);

        now.store(1_101, Ordering::SeqCst);
        let d = client.check_access("patient-001", "lab-001").await.unwrap();
        assert_eq!(d.reason, Some(DenialReason::GrantExpired));
    }

    #[tokio::test]
    async fn test_events_broadcast() {
        let ledger = local();
        let mut rx = ledger.subscribe().unwrap();
        let client = ConsentClient::new(ledger);

        client.register_org("hospital-001", &Value::Null).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::OrgRegistered);
    }

    #[tokio::test]
    async fn test_concurrent_writers_all_commit() {
        let client = ConsentClient::new(local());
        seed(&client).await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.log_access("patient-001", "lab-001", "retrieve", i).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(client.audit_trail("patient-001").await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LedgerBackend::Sqlite {
            path: dir.path().join("ledger.db"),
        };

        let client = ConsentClient::new(open_local(&backend).unwrap());
        seed(&client).await;
        drop(client);

        let client = ConsentClient::new(open_local(&backend).unwrap());
        let resource = client.query_resource("patient-001").await.unwrap();
        assert_eq!(resource.owner_org_id.as_str(), "hospital-001");
    }

    #[test]
    fn test_backend_config_shape() {
        let backend: LedgerBackend =
            serde_json::from_value(json!({"type": "sqlite", "path": "/tmp/x.db"})).unwrap();
        assert_eq!(backend, LedgerBackend::Sqlite { path: "/tmp/x.db".into() });
        assert_eq!(
            serde_json::from_value::<LedgerBackend>(json!({"type": "memory"})).unwrap(),
            LedgerBackend::Memory
        );
    }
}
