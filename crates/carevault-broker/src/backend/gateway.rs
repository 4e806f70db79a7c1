//! Racing blob fetches across gateways.
//!
//! The primary gateway gets a head start. If it has not answered when the
//! head start elapses, or fails before then, the fallbacks are launched in
//! preference order and the first success from any gateway wins. All
//! attempts share one overall budget chosen by the blob's size class.

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::blob::Gateway;
use super::{BackendError, BackendResult};
use crate::config::GatewayConfig;

/// Rough size of a blob, used to pick a fetch budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    /// Guess from a resource type tag. Imaging is large, documents medium,
    /// everything else small.
    pub fn for_resource_type(resource_type: &str) -> Self {
        let t = resource_type.to_ascii_lowercase();
        if t.contains("dicom") || t.contains("imaging") {
            SizeClass::Large
        } else if t.contains("pdf") {
            SizeClass::Medium
        } else {
            SizeClass::Small
        }
    }
}

/// An ordered set of gateways raced with a primary head start.
#[derive(Clone)]
pub struct GatewayRace {
    gateways: Vec<Arc<dyn Gateway>>,
    config: GatewayConfig,
}

type Attempt = (String, BackendResult<Bytes>);

fn launch(set: &mut JoinSet<Attempt>, gateway: Arc<dyn Gateway>, content_id: &str) {
    let content_id = content_id.to_string();
    set.spawn(async move {
        let result = gateway.fetch(&content_id).await;
        (gateway.name().to_string(), result)
    });
}

impl GatewayRace {
    /// Gateways in preference order; the first is the primary.
    pub fn new(gateways: Vec<Arc<dyn Gateway>>, config: GatewayConfig) -> Self {
        Self { gateways, config }
    }

    pub fn gateway_names(&self) -> Vec<String> {
        self.gateways.iter().map(|g| g.name().to_string()).collect()
    }

    /// Fetch `content_id` within the budget for `size`.
    pub async fn fetch(&self, content_id: &str, size: SizeClass) -> BackendResult<Bytes> {
        let budget = self.config.budget(size);
        match tokio::time::timeout(budget, self.race(content_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(content_id, budget_ms = budget.as_millis() as u64, "blob fetch timed out");
                Err(BackendError::Timeout(budget.as_millis() as u64))
            }
        }
    }

    async fn race(&self, content_id: &str) -> BackendResult<Bytes> {
        let Some((primary, fallbacks)) = self.gateways.split_first() else {
            return Err(BackendError::Unavailable("no gateways configured".into()));
        };

        let mut attempts = JoinSet::new();
        launch(&mut attempts, primary.clone(), content_id);

        let head_start = tokio::time::sleep(self.config.head_start);
        tokio::pin!(head_start);

        let mut fallbacks_launched = fallbacks.is_empty();
        let mut failures: Vec<String> = Vec::new();

        loop {
            tokio::select! {
                _ = &mut head_start, if !fallbacks_launched => {
                    debug!(content_id, "primary gateway head start elapsed");
                    for gateway in fallbacks {
                        launch(&mut attempts, gateway.clone(), content_id);
                    }
                    fallbacks_launched = true;
                }
                joined = attempts.join_next(), if !attempts.is_empty() => {
                    match joined {
                        Some(Ok((name, Ok(bytes)))) => {
                            debug!(content_id, gateway = %name, size = bytes.len(), "blob fetched");
                            attempts.abort_all();
                            return Ok(bytes);
                        }
                        Some(Ok((name, Err(e)))) => {
                            warn!(content_id, gateway = %name, error = %e, "gateway fetch failed");
                            failures.push(format!("{}: {}", name, e));
                        }
                        Some(Err(e)) => {
                            warn!(content_id, error = %e, "gateway task failed");
                            failures.push(e.to_string());
                        }
                        None => {}
                    }

                    // Nothing left in flight: stop waiting for the head start.
                    if attempts.is_empty() && !fallbacks_launched {
                        for gateway in fallbacks {
                            launch(&mut attempts, gateway.clone(), content_id);
                        }
                        fallbacks_launched = true;
                    }
                }
                else => break,
            }

            if fallbacks_launched && attempts.is_empty() {
                break;
            }
        }

        Err(BackendError::Unavailable(format!(
            "all gateways failed: {}",
            failures.join("; ")
        )))
    }
}
