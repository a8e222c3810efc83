//! Session-scoped orchestration of the acceptance-test pipeline.
//!
//! A [`Workflow`] is the context for one user working through the pipeline:
//!
//! ```text
//! ingest → generate ─┬→ request_preview → confirm / cancel_preview
//!                    └→ approve (backend cannot preview)
//!        → start_run → polling → terminal run
//! ```
//!
//! - Every stage call goes through [`state::guard`], so calling a stage out of
//!   order is an [`InvalidTransition`](crate::error::WorkflowError::InvalidTransition).
//! - Ingest, generate, preview, approve and run start share one in-flight
//!   slot; a second call while one is outstanding fails with
//!   [`Busy`](crate::error::WorkflowError::Busy).
//! - Duplicate conflicts come back as [`Gated::DuplicateConflict`], not errors.
//! - Run polling stops on a terminal status, on a new ingest, on
//!   [`Workflow::dispose`], or when the workflow is dropped.

mod collection;
mod guard;
mod metrics;
mod preview;
mod run;
mod session;
pub mod state;
mod task;

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod workflow_tests;

pub use collection::TestCaseCollection;
pub use guard::{DuplicateGuard, GuardDecision};
pub use metrics::MetricsAggregator;
pub use preview::{ApprovalStep, PendingPreview, PreviewOutcome};
pub use run::{wait_terminal, RunController, RunHandle};
pub use state::{Action, Event, WorkflowState};
pub use task::TaskHandle;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    ApprovalReceipt, ApproveRequest, Backend, Coverage, Duplicate, Gated, GenerateRequest,
    GeneratedSuite, IngestInput, Metrics, PreviewResponse, Run, RunOptions, Session, TestCase,
};
use crate::config::PollingConfig;
use crate::error::{ValidationError, WorkflowError, WorkflowResult};
use session::SessionScope;

/// Timing knobs for a workflow context
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Interval between run polls
    pub poll_interval: Duration,
    /// Independent metrics polling, if any
    pub metrics_interval: Option<Duration>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for WorkflowConfig {
    fn from(config: &PollingConfig) -> Self {
        Self {
            poll_interval: config.run_interval(),
            metrics_interval: config.metrics_interval(),
        }
    }
}

struct Inner {
    state: WorkflowState,
    scope: Option<SessionScope>,
}

impl Inner {
    fn scope_mut(&mut self, action: Action) -> WorkflowResult<&mut SessionScope> {
        self.scope.as_mut().ok_or(WorkflowError::InvalidTransition {
            action,
            state: self.state,
        })
    }

    /// Fold the latest polled run status into the workflow state
    fn sync_run_state(&mut self) {
        if !self.state.is_run_in_progress() {
            return;
        }
        let status = self
            .scope
            .as_ref()
            .and_then(|scope| scope.run.as_ref())
            .map(RunHandle::status);
        if let Some(status) = status {
            self.state = state::next(self.state, Event::RunObserved(status));
        }
    }

    /// Record a duplicate conflict; the state loops back to itself
    fn conflict<T>(&mut self, action: Action, duplicates: Vec<Duplicate>) -> WorkflowResult<Gated<T>> {
        let scope = self.scope_mut(action)?;
        scope.duplicates = duplicates.clone();
        self.state = state::next(self.state, Event::DuplicateConflict);
        warn!(
            action = %action,
            count = duplicates.len(),
            "Duplicate tests block progress"
        );
        Ok(Gated::DuplicateConflict { duplicates })
    }
}

/// Orchestrator context for one user session.
pub struct Workflow {
    context_id: Uuid,
    backend: Arc<dyn Backend>,
    runs: RunController,
    metrics: Arc<MetricsAggregator>,
    metrics_poll: Mutex<Option<TaskHandle>>,
    in_flight: Mutex<()>,
    inner: Mutex<Inner>,
}

impl Workflow {
    /// Open a context: load initial metrics and start metrics polling if configured.
    pub async fn open(backend: Arc<dyn Backend>, config: WorkflowConfig) -> Self {
        let metrics = Arc::new(MetricsAggregator::new(Arc::clone(&backend)));
        metrics.refresh_quietly().await;
        let metrics_poll = config
            .metrics_interval
            .map(|interval| metrics.spawn_polling(interval));
        let runs = RunController::new(
            Arc::clone(&backend),
            Arc::clone(&metrics),
            config.poll_interval,
        );

        let context_id = Uuid::new_v4();
        info!(
            context_id = %context_id,
            poll_interval_ms = config.poll_interval.as_millis(),
            "Workflow context opened"
        );

        Self {
            context_id,
            backend,
            runs,
            metrics,
            metrics_poll: Mutex::new(metrics_poll),
            in_flight: Mutex::new(()),
            inner: Mutex::new(Inner {
                state: WorkflowState::Input,
                scope: None,
            }),
        }
    }

    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    fn begin(&self, action: Action) -> WorkflowResult<MutexGuard<'_, ()>> {
        self.in_flight.try_lock().map_err(|_| {
            warn!(context_id = %self.context_id, action = %action, "Rejected concurrent submission");
            WorkflowError::Busy { action }
        })
    }

    fn resubmit_notice(&self, action: Action, count: usize) {
        debug!(
            context_id = %self.context_id,
            action = %action,
            count,
            "Conflict only lists accepted duplicates, resubmitting with override"
        );
    }

    async fn lock(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().await;
        inner.sync_run_state();
        inner
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// Parse a requirement and open a new session.
    ///
    /// Replaces any previous session with everything downstream of it,
    /// including a run that is still being polled.
    pub async fn ingest(&self, input: IngestInput) -> WorkflowResult<Session> {
        let _slot = self.begin(Action::Ingest)?;
        session::validate_input(&input).await?;

        let session = self.backend.ingest(&input).await?;

        let mut inner = self.lock().await;
        if let Some(previous) = inner.scope.take() {
            debug!(
                context_id = %self.context_id,
                session_id = %previous.session.session_id,
                "Session superseded"
            );
        }
        inner.scope = Some(SessionScope::new(session.clone()));
        inner.state = state::next(inner.state, Event::Ingested);

        info!(
            context_id = %self.context_id,
            session_id = %session.session_id,
            "Session opened"
        );
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Generate and select
    // ------------------------------------------------------------------

    /// Generate candidate test cases.
    ///
    /// On success the selection is reset to all test cases. On a duplicate
    /// conflict the previous test cases and selection stay as they were and
    /// only the duplicate list is replaced.
    pub async fn generate(
        &self,
        coverage: Coverage,
        allow_duplicates: bool,
    ) -> WorkflowResult<Gated<GeneratedSuite>> {
        let _slot = self.begin(Action::Generate)?;

        let (session, accepted) = {
            let mut inner = self.lock().await;
            state::guard(inner.state, Action::Generate)?;
            let scope = inner.scope_mut(Action::Generate)?;
            (scope.session.clone(), scope.accepted_duplicates.clone())
        };

        let mut allow = allow_duplicates;
        let response = loop {
            let request = GenerateRequest {
                requirement_id: session.requirement_id.clone(),
                coverage,
                allow_duplicates: allow,
            };
            let response = self.backend.generate(&session.session_id, &request).await?;
            match response {
                Gated::DuplicateConflict { duplicates }
                    if !allow && DuplicateGuard::covers(&accepted, &duplicates) =>
                {
                    self.resubmit_notice(Action::Generate, duplicates.len());
                    allow = true;
                }
                response => break response,
            }
        };

        let mut inner = self.lock().await;
        let suite = match response {
            Gated::Accepted(suite) => suite,
            Gated::DuplicateConflict { duplicates } => {
                return inner.conflict(Action::Generate, duplicates);
            }
        };
        let allow = allow || DuplicateGuard::covers(&accepted, &suite.duplicates);
        if DuplicateGuard::decide(&suite.duplicates, allow) == GuardDecision::Block {
            return inner.conflict(Action::Generate, suite.duplicates);
        }

        let scope = inner.scope_mut(Action::Generate)?;
        scope.collection.replace(suite.test_cases);
        scope.accept_duplicates(&suite.duplicates);
        scope.duplicates = suite.duplicates.clone();
        scope.preview = None;
        scope.run = None;
        let committed = GeneratedSuite {
            test_cases: scope.collection.test_cases().to_vec(),
            duplicates: suite.duplicates,
        };
        inner.state = state::next(inner.state, Event::Generated);

        info!(
            context_id = %self.context_id,
            session_id = %session.session_id,
            count = committed.test_cases.len(),
            coverage = %coverage,
            "Test cases generated"
        );
        Ok(Gated::Accepted(committed))
    }

    /// Select or deselect one test case
    pub async fn set_selected(&self, test_case_id: &str, selected: bool) -> WorkflowResult<()> {
        let mut inner = self.lock().await;
        state::guard(inner.state, Action::EditSelection)?;
        let scope = inner.scope_mut(Action::EditSelection)?;
        scope.collection.set_selected(test_case_id, selected)?;
        Ok(())
    }

    /// Select or deselect all test cases
    pub async fn select_all(&self, selected: bool) -> WorkflowResult<()> {
        let mut inner = self.lock().await;
        state::guard(inner.state, Action::EditSelection)?;
        inner.scope_mut(Action::EditSelection)?.collection.set_all(selected);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Preview and approval
    // ------------------------------------------------------------------

    /// Preview first; approve directly only if the backend cannot preview.
    pub async fn submit_for_approval(&self, allow_duplicates: bool) -> WorkflowResult<ApprovalStep> {
        let _slot = self.begin(Action::RequestPreview)?;

        match self.preview_in_slot().await? {
            PreviewOutcome::Ready(diffs) => Ok(ApprovalStep::AwaitingConfirmation(diffs)),
            PreviewOutcome::Unsupported => match self.approve_in_slot(allow_duplicates).await? {
                Gated::Accepted(receipt) => Ok(ApprovalStep::Approved(receipt)),
                Gated::DuplicateConflict { duplicates } => {
                    Ok(ApprovalStep::DuplicateConflict { duplicates })
                }
            },
        }
    }

    /// Ask for diff previews of the current selection.
    ///
    /// The previewed id set is captured; [`confirm`](Self::confirm) submits
    /// exactly that set.
    pub async fn request_preview(&self) -> WorkflowResult<PreviewOutcome> {
        let _slot = self.begin(Action::RequestPreview)?;
        self.preview_in_slot().await
    }

    async fn preview_in_slot(&self) -> WorkflowResult<PreviewOutcome> {
        let (session_id, ids, revision) = {
            let mut inner = self.lock().await;
            state::guard(inner.state, Action::RequestPreview)?;
            let scope = inner.scope_mut(Action::RequestPreview)?;
            let ids = scope.collection.selected_ids();
            if ids.is_empty() {
                return Err(ValidationError::SelectionEmpty.into());
            }
            (
                scope.session.session_id.clone(),
                ids,
                scope.collection.revision(),
            )
        };

        let response = self.backend.preview(&session_id, &ids).await?;

        let mut inner = self.lock().await;
        let scope = inner.scope_mut(Action::RequestPreview)?;
        match response {
            PreviewResponse::Diffs(diffs) => {
                debug!(
                    context_id = %self.context_id,
                    session_id = %session_id,
                    count = diffs.len(),
                    "Previews ready"
                );
                scope.preview_supported = Some(true);
                scope.preview = Some(PendingPreview::new(ids, diffs.clone(), revision));
                inner.state = state::next(inner.state, Event::PreviewReady);
                Ok(PreviewOutcome::Ready(diffs))
            }
            PreviewResponse::Unsupported => {
                scope.preview_supported = Some(false);
                scope.preview = None;
                inner.state = state::next(inner.state, Event::PreviewUnsupported);
                Ok(PreviewOutcome::Unsupported)
            }
        }
    }

    /// Approve the previewed id set
    pub async fn confirm(&self, allow_duplicates: bool) -> WorkflowResult<Gated<ApprovalReceipt>> {
        let _slot = self.begin(Action::ConfirmApproval)?;

        let (session, ids, accepted) = {
            let mut inner = self.lock().await;
            state::guard(inner.state, Action::ConfirmApproval)?;
            let state = inner.state;
            let scope = inner.scope_mut(Action::ConfirmApproval)?;
            let preview = scope.preview.as_ref().ok_or(WorkflowError::InvalidTransition {
                action: Action::ConfirmApproval,
                state,
            })?;
            if !preview.is_current(scope.collection.revision()) {
                return Err(WorkflowError::PreviewStale);
            }
            let ids = preview.submitted_ids().to_vec();
            (
                scope.session.clone(),
                ids,
                scope.accepted_duplicates.clone(),
            )
        };

        self.submit_approval(
            Action::ConfirmApproval,
            &session,
            ids,
            allow_duplicates,
            &accepted,
        )
        .await
    }

    /// Drop the pending preview and go back to selection
    pub async fn cancel_preview(&self) -> WorkflowResult<()> {
        let _slot = self.begin(Action::CancelPreview)?;
        let mut inner = self.lock().await;
        state::guard(inner.state, Action::CancelPreview)?;
        inner.scope_mut(Action::CancelPreview)?.preview = None;
        inner.state = state::next(inner.state, Event::PreviewCancelled);
        debug!(context_id = %self.context_id, "Preview cancelled");
        Ok(())
    }

    /// Approve the current selection without a preview.
    ///
    /// Only valid while the backend has not shown it can preview.
    pub async fn approve(&self, allow_duplicates: bool) -> WorkflowResult<Gated<ApprovalReceipt>> {
        let _slot = self.begin(Action::Approve)?;
        self.approve_in_slot(allow_duplicates).await
    }

    async fn approve_in_slot(&self, allow_duplicates: bool) -> WorkflowResult<Gated<ApprovalReceipt>> {
        let (session, ids, accepted) = {
            let mut inner = self.lock().await;
            state::guard(inner.state, Action::Approve)?;
            let scope = inner.scope_mut(Action::Approve)?;
            let ids = scope.collection.selected_ids();
            if ids.is_empty() {
                return Err(ValidationError::SelectionEmpty.into());
            }
            if scope.preview_supported == Some(true) {
                return Err(WorkflowError::PreviewRequired);
            }
            (
                scope.session.clone(),
                ids,
                scope.accepted_duplicates.clone(),
            )
        };

        self.submit_approval(Action::Approve, &session, ids, allow_duplicates, &accepted)
            .await
    }

    async fn submit_approval(
        &self,
        action: Action,
        session: &Session,
        ids: Vec<String>,
        allow_duplicates: bool,
        accepted: &[Duplicate],
    ) -> WorkflowResult<Gated<ApprovalReceipt>> {
        let mut request = ApproveRequest {
            requirement_id: session.requirement_id.clone(),
            test_case_ids: ids,
            approved: true,
            allow_duplicates,
            notes: None,
        };
        let response = loop {
            let response = self.backend.approve(&session.session_id, &request).await?;
            match response {
                Gated::DuplicateConflict { duplicates }
                    if !request.allow_duplicates
                        && DuplicateGuard::covers(accepted, &duplicates) =>
                {
                    self.resubmit_notice(action, duplicates.len());
                    request.allow_duplicates = true;
                }
                response => break response,
            }
        };

        let mut inner = self.lock().await;
        let receipt = match response {
            Gated::Accepted(receipt) => receipt,
            Gated::DuplicateConflict { duplicates } => return inner.conflict(action, duplicates),
        };
        let allow =
            request.allow_duplicates || DuplicateGuard::covers(accepted, &receipt.duplicates);
        if DuplicateGuard::decide(&receipt.duplicates, allow) == GuardDecision::Block {
            return inner.conflict(action, receipt.duplicates);
        }

        let scope = inner.scope_mut(action)?;
        scope.preview = None;
        scope.accept_duplicates(&receipt.duplicates);
        scope.duplicates = receipt.duplicates.clone();
        inner.state = state::next(inner.state, Event::Approved);

        info!(
            context_id = %self.context_id,
            session_id = %session.session_id,
            count = request.test_case_ids.len(),
            files = receipt.generated_files.len(),
            "Test cases approved"
        );
        Ok(Gated::Accepted(receipt))
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Start a run of the approved tests and begin polling it.
    pub async fn start_run(&self, options: RunOptions) -> WorkflowResult<Run> {
        let _slot = self.begin(Action::StartRun)?;

        let session_id = {
            let mut inner = self.lock().await;
            state::guard(inner.state, Action::StartRun)?;
            inner.scope_mut(Action::StartRun)?.session.session_id.clone()
        };

        let run = self.runs.start(&session_id, &options).await?;
        let handle = self.runs.watch(run.clone());

        {
            let mut inner = self.lock().await;
            inner.scope_mut(Action::StartRun)?.run = Some(handle);
            inner.state = state::next(inner.state, Event::RunQueued);
            inner.sync_run_state();
        }

        info!(
            context_id = %self.context_id,
            session_id = %session_id,
            run_id = %run.id,
            ui_mode = ?options.ui_mode,
            api_mode = ?options.api_mode,
            "Run started"
        );
        self.metrics.refresh_quietly().await;
        Ok(run)
    }

    /// Latest observed record of the current run
    pub async fn run(&self) -> Option<Run> {
        let inner = self.lock().await;
        inner
            .scope
            .as_ref()
            .and_then(|scope| scope.run.as_ref())
            .map(RunHandle::current)
    }

    /// Wait until the current run reaches a terminal status
    pub async fn wait_for_run(&self) -> WorkflowResult<Run> {
        let (run_id, updates) = {
            let inner = self.lock().await;
            let handle = inner
                .scope
                .as_ref()
                .and_then(|scope| scope.run.as_ref())
                .ok_or(WorkflowError::NoActiveRun)?;
            (handle.run_id().to_string(), handle.subscribe())
        };

        let run = wait_terminal(updates)
            .await
            .ok_or(WorkflowError::PollingStopped { run_id })?;
        // fold the terminal status into the workflow state
        drop(self.lock().await);
        Ok(run)
    }

    /// Stop run and metrics polling and wait for both tasks to exit.
    /// The workflow stays usable for reads.
    pub async fn dispose(&self) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(handle) = inner.scope.as_mut().and_then(|scope| scope.run.as_mut()) {
                handle.shutdown().await;
            }
        }
        let metrics_poll = self.metrics_poll.lock().await.take();
        if let Some(mut task) = metrics_poll {
            task.shutdown().await;
        }
        debug!(context_id = %self.context_id, "Workflow context disposed");
    }

    /// Whether the current run is still being polled
    pub async fn is_polling(&self) -> bool {
        let inner = self.lock().await;
        inner
            .scope
            .as_ref()
            .and_then(|scope| scope.run.as_ref())
            .is_some_and(|handle| !handle.is_stopped())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn state(&self) -> WorkflowState {
        self.lock().await.state
    }

    pub async fn session(&self) -> Option<Session> {
        let inner = self.lock().await;
        inner.scope.as_ref().map(|scope| scope.session.clone())
    }

    pub async fn test_cases(&self) -> Vec<TestCase> {
        let inner = self.lock().await;
        inner
            .scope
            .as_ref()
            .map(|scope| scope.collection.test_cases().to_vec())
            .unwrap_or_default()
    }

    pub async fn selection(&self) -> BTreeMap<String, bool> {
        let inner = self.lock().await;
        inner
            .scope
            .as_ref()
            .map(|scope| scope.collection.selection().clone())
            .unwrap_or_default()
    }

    pub async fn selected_ids(&self) -> Vec<String> {
        let inner = self.lock().await;
        inner
            .scope
            .as_ref()
            .map(|scope| scope.collection.selected_ids())
            .unwrap_or_default()
    }

    /// Duplicates reported by the most recent generate or approve attempt
    pub async fn duplicates(&self) -> Vec<Duplicate> {
        let inner = self.lock().await;
        inner
            .scope
            .as_ref()
            .map(|scope| scope.duplicates.clone())
            .unwrap_or_default()
    }

    pub async fn pending_preview(&self) -> Option<PendingPreview> {
        let inner = self.lock().await;
        inner.scope.as_ref().and_then(|scope| scope.preview.clone())
    }

    /// Duplicates already let through with the override in this session.
    ///
    /// A later conflict made up only of these is resubmitted with the
    /// override; any other duplicate surfaces as a conflict again.
    pub async fn accepted_duplicates(&self) -> Vec<Duplicate> {
        let inner = self.lock().await;
        inner
            .scope
            .as_ref()
            .map(|scope| scope.accepted_duplicates.clone())
            .unwrap_or_default()
    }

    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        Arc::clone(&self.metrics)
    }

    pub async fn metrics_snapshot(&self) -> Arc<Metrics> {
        self.metrics.snapshot().await
    }
}
