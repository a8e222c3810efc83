use thiserror::Error;

use crate::workflow::{Action, WorkflowState};

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Input problems caught before any request is sent
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Requirement input is empty: provide story text or a non-empty file")]
    EmptyRequirement,

    #[error("No test cases selected for approval")]
    SelectionEmpty,

    #[error("Unknown test case: {id}")]
    UnknownTestCase { id: String },

    #[error("Cannot read requirement file {path}: {message}")]
    UnreadableFile { path: String, message: String },
}

/// Backend API errors.
///
/// All of these are transient from the workflow's point of view: the action
/// that triggered them can be retried by hand without repeating earlier stages.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised by the session workflow
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cannot {action} while workflow is {state}")]
    InvalidTransition {
        action: Action,
        state: WorkflowState,
    },

    #[error("Cannot {action}: another request is still in flight")]
    Busy { action: Action },

    #[error("Selection changed since the preview was requested; request a new preview")]
    PreviewStale,

    #[error("Preview is supported by the backend; request a preview and confirm it")]
    PreviewRequired,

    #[error("No run has been started in this session")]
    NoActiveRun,

    #[error("Polling for run {run_id} stopped before it finished")]
    PollingStopped { run_id: String },

    #[error("Backend request failed: {0}")]
    Backend(#[from] BackendError),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
