//! Aggregate dashboard statistics.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::task::TaskHandle;
use crate::backend::{Backend, Metrics};
use crate::error::BackendResult;

/// Holds the latest metrics snapshot and refreshes it from the backend.
///
/// Each refresh replaces the whole snapshot; readers see either the old or the
/// new value, never a mix. Until the first successful refresh the snapshot is
/// the zero state.
pub struct MetricsAggregator {
    backend: Arc<dyn Backend>,
    snapshot: RwLock<Arc<Metrics>>,
}

impl MetricsAggregator {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            snapshot: RwLock::new(Arc::new(Metrics::zero())),
        }
    }

    /// Fetch fresh metrics and replace the snapshot
    pub async fn refresh(&self) -> BackendResult<Arc<Metrics>> {
        let metrics = Arc::new(self.backend.metrics().await?);
        *self.snapshot.write().await = Arc::clone(&metrics);
        debug!(
            total_runs = metrics.total_runs,
            pass_rate = metrics.pass_rate,
            "Metrics refreshed"
        );
        Ok(metrics)
    }

    /// Refresh, logging instead of returning failures
    pub async fn refresh_quietly(&self) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Metrics refresh failed, keeping previous snapshot");
        }
    }

    /// Latest snapshot
    pub async fn snapshot(&self) -> Arc<Metrics> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Refresh on a fixed interval until the returned handle is cancelled or dropped
    pub fn spawn_polling(self: &Arc<Self>, interval: Duration) -> TaskHandle {
        let aggregator = Arc::clone(self);
        TaskHandle::spawn_periodic("metrics-poll", interval, move || {
            let aggregator = Arc::clone(&aggregator);
            async move {
                aggregator.refresh_quietly().await;
                ControlFlow::Continue(())
            }
        })
    }
}
