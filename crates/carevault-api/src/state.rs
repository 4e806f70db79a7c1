//! Application state for the API server

use serde::{Deserialize, Serialize};

use carevault_broker::{Broker, BrokerConfig};

/// API server state
#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    /// API version
    pub version: String,
}

impl AppState {
    pub fn new(broker: Broker) -> Self {
        Self {
            broker,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub broker: BrokerConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            broker: BrokerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ApiConfig =
            serde_json::from_str(r#"{"port": 8080, "broker": {"namespace": "cv"}}"#).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.broker.namespace, "cv");
        assert!(config.broker.allow_shared_key_fallback);
    }
}
