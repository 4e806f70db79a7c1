//! API Server setup

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use carevault_broker::Broker;
use carevault_ledger::LedgerEvent;

use crate::routes::create_router;
use crate::state::{ApiConfig, AppState};

/// Router with request tracing
pub fn create_app(state: AppState) -> Router {
    create_router(state).layer(TraceLayer::new_for_http())
}

/// Build the broker and the app, and resolve the listen address
pub fn create_server(config: &ApiConfig) -> anyhow::Result<(Router, Broker, SocketAddr)> {
    let broker = Broker::in_memory(config.broker.clone()).context("failed to open broker")?;
    let app = create_app(AppState::new(broker.clone()));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    Ok((app, broker, addr))
}

/// Log every ledger event until the ledger goes away.
pub fn spawn_event_logger(broker: &Broker) -> Option<tokio::task::JoinHandle<()>> {
    let mut events = broker.ledger().ledger().subscribe()?;
    Some(tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "ledger event log lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }))
}

fn log_event(event: &LedgerEvent) {
    info!(
        event_type = ?event.event_type,
        tx_id = %event.tx_id,
        payload = %serde_json::Value::Object(event.payload.clone()),
        "ledger event"
    );
}

/// Run the API server until ctrl-c
pub async fn run_server(config: ApiConfig) -> anyhow::Result<()> {
    let (app, broker, addr) = create_server(&config)?;
    spawn_event_logger(&broker);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("CareVault API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("CareVault API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
