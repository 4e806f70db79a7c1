//! Events emitted by mutating contract calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    OrgRegistered,
    ResourceUploaded,
    AccessGranted,
    AccessRevoked,
    AccessLogged,
    OrgRevoked,
    OrgReinstated,
}

/// `{eventType, ...payload, txId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub event_type: EventType,

    #[serde(flatten)]
    pub payload: Map<String, Value>,

    pub tx_id: String,
}

impl LedgerEvent {
    /// Build an event from a serializable payload. Non-object payloads are
    /// stored under a `value` field.
    pub fn new(event_type: EventType, payload: Value, tx_id: &str) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        Self {
            event_type,
            payload,
            tx_id: tx_id.to_string(),
        }
    }
}
