//! Fire-and-forget audit logging.
//!
//! Retrievals and denials are queued on a bounded channel and written to the
//! ledger by a background task, so a slow or failing ledger never delays a
//! response. When the queue is full the entry is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use carevault_core::OrgId;
use carevault_ledger::ConsentClient;

use crate::config::AuditConfig;

/// One access to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub resource_id: String,
    pub org_id: OrgId,
    pub action: String,
    pub timestamp: i64,
}

/// Worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Entries the ledger accepted.
    pub recorded: u64,
    /// Entries the ledger rejected or did not answer for.
    pub failed: u64,
    /// Entries lost to a full or closed queue.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    recorded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Sender side of the audit queue.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEvent>,
    counters: Arc<Counters>,
}

impl AuditHandle {
    /// Queue an entry without waiting.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let event = match &e {
                mpsc::error::TrySendError::Full(ev) | mpsc::error::TrySendError::Closed(ev) => ev,
            };
            warn!(
                resource_id = %event.resource_id,
                org_id = %event.org_id,
                action = %event.action,
                "audit queue unavailable; entry dropped"
            );
        }
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Background writer.
pub struct AuditWorker;

impl AuditWorker {
    /// Spawn the worker on the current runtime. It runs until every
    /// [`AuditHandle`] is dropped.
    pub fn spawn(
        ledger: ConsentClient,
        config: &AuditConfig,
        ledger_timeout: Duration,
    ) -> (AuditHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(config.capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker_counters = counters.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let call = ledger.log_access(
                    &event.resource_id,
                    event.org_id.as_str(),
                    &event.action,
                    event.timestamp,
                );
                match tokio::time::timeout(ledger_timeout, call).await {
                    Ok(Ok(submitted)) => {
                        worker_counters.recorded.fetch_add(1, Ordering::Relaxed);
                        debug!(audit_id = %submitted.result.audit_id, "audit entry recorded");
                    }
                    Ok(Err(e)) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            resource_id = %event.resource_id,
                            org_id = %event.org_id,
                            action = %event.action,
                            error = %e,
                            "audit entry rejected"
                        );
                    }
                    Err(_) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            resource_id = %event.resource_id,
                            org_id = %event.org_id,
                            action = %event.action,
                            "audit entry timed out"
                        );
                    }
                }
            }
            debug!("audit worker stopped");
        });

        (AuditHandle { tx, counters }, task)
    }
}
