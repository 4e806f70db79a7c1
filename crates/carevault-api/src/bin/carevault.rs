//! CareVault API server binary.
//!
//! Configuration comes from the JSON file named by `CAREVAULT_CONFIG`
//! (optional), then `CAREVAULT_HOST` and `CAREVAULT_PORT`. Log filtering
//! follows `RUST_LOG`.

use std::env;
use std::fs;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use carevault_api::{run_server, ApiConfig};

fn load_config() -> anyhow::Result<ApiConfig> {
    let mut config = match env::var("CAREVAULT_CONFIG") {
        Ok(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path))?
        }
        Err(_) => ApiConfig::default(),
    };

    if let Ok(host) = env::var("CAREVAULT_HOST") {
        config.host = host;
    }
    if let Ok(port) = env::var("CAREVAULT_PORT") {
        config.port = port
            .parse()
            .with_context(|| format!("invalid CAREVAULT_PORT {}", port))?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        ledger = ?config.broker.ledger,
        "starting CareVault"
    );

    run_server(config).await
}
