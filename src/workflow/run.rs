//! Run creation and status polling.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::metrics::MetricsAggregator;
use super::task::TaskHandle;
use crate::backend::{Backend, Run, RunOptions, RunRequest, RunStatus};
use crate::error::BackendResult;

/// Starts runs and polls them to a terminal status.
#[derive(Clone)]
pub struct RunController {
    backend: Arc<dyn Backend>,
    metrics: Arc<MetricsAggregator>,
    interval: Duration,
}

impl RunController {
    pub fn new(
        backend: Arc<dyn Backend>,
        metrics: Arc<MetricsAggregator>,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            metrics,
            interval,
        }
    }

    /// Create a run. The returned record has the backend's initial status.
    pub async fn start(&self, session_id: &str, options: &RunOptions) -> BackendResult<Run> {
        let request = RunRequest::new(session_id, options);
        let ticket = self.backend.create_run(&request).await?;
        Ok(Run::from_ticket(ticket, &request))
    }

    /// Poll `run` until it is terminal.
    ///
    /// Each tick sends a refresh then a fetch. A failed fetch is skipped and
    /// retried on the next tick. Metrics are refreshed whenever the observed
    /// status changes.
    pub fn watch(&self, run: Run) -> RunHandle {
        let (tx, rx) = watch::channel(run.clone());
        let run_id = run.id.clone();

        if run.is_terminal() {
            debug!(run_id = %run_id, status = %run.status, "Run already terminal, not polling");
            return RunHandle {
                run_id,
                updates: rx,
                task: None,
            };
        }

        let tx = Arc::new(tx);
        let backend = Arc::clone(&self.backend);
        let metrics = Arc::clone(&self.metrics);

        let poll_id = run_id.clone();
        let task = TaskHandle::spawn_periodic("run-poll", self.interval, move || {
            let backend = Arc::clone(&backend);
            let metrics = Arc::clone(&metrics);
            let tx = Arc::clone(&tx);
            let run_id = poll_id.clone();
            async move { poll_once(backend.as_ref(), &run_id, &tx, &metrics).await }
        });

        RunHandle {
            run_id,
            updates: rx,
            task: Some(task),
        }
    }
}

async fn poll_once(
    backend: &dyn Backend,
    run_id: &str,
    tx: &watch::Sender<Run>,
    metrics: &MetricsAggregator,
) -> ControlFlow<()> {
    if let Err(e) = backend.refresh_run(run_id).await {
        debug!(run_id, error = %e, "Run refresh failed");
    }

    let run = match backend.fetch_run(run_id).await {
        Ok(run) => run,
        Err(e) => {
            warn!(run_id, error = %e, "Run poll failed, retrying next tick");
            return ControlFlow::Continue(());
        }
    };

    let previous = tx.borrow().status;
    let status = run.status;
    tx.send_replace(run);

    if status != previous {
        info!(run_id, from = %previous, to = %status, "Run status changed");
        metrics.refresh_quietly().await;
    }

    if status.is_terminal() {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

/// A run being observed. Dropping the handle stops polling.
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    updates: watch::Receiver<Run>,
    task: Option<TaskHandle>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Latest observed run record
    pub fn current(&self) -> Run {
        self.updates.borrow().clone()
    }

    pub fn status(&self) -> RunStatus {
        self.updates.borrow().status
    }

    /// Receiver that sees every observed run record
    pub fn subscribe(&self) -> watch::Receiver<Run> {
        self.updates.clone()
    }

    /// Stop polling and wait for the poll task to exit
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.task.as_mut() {
            task.shutdown().await;
        }
    }

    /// Whether polling has stopped, by terminal status or cancellation
    pub fn is_stopped(&self) -> bool {
        self.task.as_ref().map_or(true, TaskHandle::is_finished)
    }
}

/// Wait until `updates` shows a terminal run. `None` if polling stopped first.
pub async fn wait_terminal(mut updates: watch::Receiver<Run>) -> Option<Run> {
    match updates.wait_for(Run::is_terminal).await {
        Ok(run) => Some(run.clone()),
        Err(_) => None,
    }
}
