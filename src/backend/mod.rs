//! SpecWeaver backend contract and HTTP client.
//!
//! The workflow only talks to the requirement parser, test generator, code
//! synthesizer and test runner through the [`Backend`] trait. [`HttpBackend`]
//! is the production implementation.

mod client;
mod types;


pub use client::HttpBackend;
pub use types::*;

use async_trait::async_trait;

use crate::error::BackendResult;

/// Calls the orchestrator consumes from the SpecWeaver API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Parse a requirement and open a session for it.
    async fn ingest(&self, input: &IngestInput) -> BackendResult<Session>;

    /// Generate candidate test cases for a session.
    async fn generate(
        &self,
        session_id: &str,
        request: &GenerateRequest,
    ) -> BackendResult<Gated<GeneratedSuite>>;

    /// Render the file diffs an approval of `test_case_ids` would produce.
    async fn preview(&self, session_id: &str, test_case_ids: &[String])
        -> BackendResult<PreviewResponse>;

    /// Approve test cases, which triggers code synthesis on the backend.
    async fn approve(
        &self,
        session_id: &str,
        request: &ApproveRequest,
    ) -> BackendResult<Gated<ApprovalReceipt>>;

    /// Queue a test run.
    async fn create_run(&self, request: &RunRequest) -> BackendResult<RunTicket>;

    /// Ask the backend to reload run state from its artifacts. Idempotent.
    async fn refresh_run(&self, run_id: &str) -> BackendResult<()>;

    /// Fetch the full run record.
    async fn fetch_run(&self, run_id: &str) -> BackendResult<Run>;

    /// Fetch the aggregate metrics snapshot.
    async fn metrics(&self) -> BackendResult<Metrics>;

    /// Backend liveness check.
    async fn health(&self) -> BackendResult<HealthStatus>;

    /// Download a generated artifact.
    async fn download_artifact(&self, session_id: &str, filename: &str) -> BackendResult<Vec<u8>>;
}
