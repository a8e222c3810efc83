//! Per-session workflow state machine.
//!
//! ```text
//! INPUT → PARSED → GENERATED ⇄ PREVIEWING → APPROVED → RUN_QUEUED → RUN_ACTIVE → RUN_TERMINAL
//!                     ↺ duplicate conflict
//! ```
//!
//! [`guard`] decides whether an action may start from a state. [`next`]
//! applies the outcome of a finished action. State only moves on success, so
//! a failed action leaves the workflow where the action was invoked.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::RunStatus;
use crate::error::{WorkflowError, WorkflowResult};

/// Where a session currently is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// No requirement ingested yet
    Input,
    /// Requirement parsed, session open
    Parsed,
    /// Candidate test cases available for selection
    Generated,
    /// Diff previews shown, waiting for confirm or cancel
    Previewing,
    /// Approval accepted and code synthesized
    Approved,
    /// Run created, not yet picked up
    RunQueued,
    /// Run executing
    RunActive,
    /// Run finished (completed, failed or error)
    RunTerminal,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Input => "input",
            WorkflowState::Parsed => "parsed",
            WorkflowState::Generated => "generated",
            WorkflowState::Previewing => "previewing",
            WorkflowState::Approved => "approved",
            WorkflowState::RunQueued => "run_queued",
            WorkflowState::RunActive => "run_active",
            WorkflowState::RunTerminal => "run_terminal",
        }
    }

    /// Whether a run is being polled in this state
    pub fn is_run_in_progress(&self) -> bool {
        matches!(self, WorkflowState::RunQueued | WorkflowState::RunActive)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-triggered actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Ingest,
    Generate,
    EditSelection,
    RequestPreview,
    ConfirmApproval,
    CancelPreview,
    Approve,
    StartRun,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Ingest => "ingest",
            Action::Generate => "generate",
            Action::EditSelection => "edit selection",
            Action::RequestPreview => "request preview",
            Action::ConfirmApproval => "confirm approval",
            Action::CancelPreview => "cancel preview",
            Action::Approve => "approve",
            Action::StartRun => "start run",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a finished action, fed to [`next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Ingested,
    Generated,
    DuplicateConflict,
    PreviewReady,
    PreviewUnsupported,
    PreviewCancelled,
    Approved,
    RunQueued,
    RunObserved(RunStatus),
}

/// Check that `action` may start from `state`.
pub fn guard(state: WorkflowState, action: Action) -> WorkflowResult<()> {
    use WorkflowState::*;

    let allowed = match action {
        Action::Ingest => true,
        Action::Generate => matches!(state, Parsed | Generated | Approved | RunTerminal),
        Action::EditSelection | Action::RequestPreview => matches!(state, Generated | Previewing),
        Action::ConfirmApproval | Action::CancelPreview => state == Previewing,
        Action::Approve => state == Generated,
        Action::StartRun => matches!(state, Approved | RunTerminal),
    };

    if allowed {
        Ok(())
    } else {
        Err(WorkflowError::InvalidTransition { action, state })
    }
}

/// State after `event` happened in `state`.
pub fn next(state: WorkflowState, event: Event) -> WorkflowState {
    use WorkflowState::*;

    match event {
        Event::Ingested => Parsed,
        Event::Generated => Generated,
        Event::DuplicateConflict => state,
        Event::PreviewReady => Previewing,
        Event::PreviewUnsupported | Event::PreviewCancelled => Generated,
        Event::Approved => Approved,
        Event::RunQueued => RunQueued,
        Event::RunObserved(status) => {
            // Poll results only move a run that is still in flight.
            if !state.is_run_in_progress() {
                return state;
            }
            match status {
                RunStatus::Queued => RunQueued,
                RunStatus::Running => RunActive,
                RunStatus::Completed | RunStatus::Failed | RunStatus::Error => RunTerminal,
                RunStatus::Unknown => state,
            }
        }
    }
}
