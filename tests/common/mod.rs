//! Shared fake backend for workflow and polling tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use specweaver_client::backend::{
    ApprovalReceipt, ApproveRequest, Backend, DiffPreview, Duplicate, Gated, GenerateRequest,
    GeneratedSuite, HealthStatus, IngestInput, Metrics, PreviewResponse, Run, RunRequest,
    RunStatus, RunTicket, Session, TestCase, TestType,
};
use specweaver_client::error::{BackendError, BackendResult};

/// Call counters, one per backend operation
#[derive(Debug, Default)]
pub struct Calls {
    pub ingest: AtomicUsize,
    pub generate: AtomicUsize,
    pub preview: AtomicUsize,
    pub approve: AtomicUsize,
    pub create_run: AtomicUsize,
    pub refresh_run: AtomicUsize,
    pub fetch_run: AtomicUsize,
    pub metrics: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// In-memory backend with scripted responses.
pub struct FakeBackend {
    pub calls: Calls,
    /// Test cases returned by generate
    pub test_cases: Mutex<Vec<TestCase>>,
    /// Duplicates reported by generate/approve unless `allow_duplicates` is set
    pub duplicates: Mutex<Vec<Duplicate>>,
    pub preview_supported: bool,
    /// Status returned by create_run
    pub initial_status: RunStatus,
    /// Statuses returned by successive fetches; the last one repeats
    pub fetch_script: Mutex<VecDeque<BackendResult<RunStatus>>>,
    /// Approve requests seen, in order
    pub approvals: Mutex<Vec<ApproveRequest>>,
    /// When set, ingest waits for a notification before answering
    pub ingest_gate: Option<Arc<Notify>>,
    last_status: Mutex<RunStatus>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            calls: Calls::default(),
            test_cases: Mutex::new(vec![
                test_case("TC-1", TestType::Positive),
                test_case("TC-2", TestType::Negative),
                test_case("TC-3", TestType::Edge),
            ]),
            duplicates: Mutex::new(Vec::new()),
            preview_supported: true,
            initial_status: RunStatus::Queued,
            fetch_script: Mutex::new(VecDeque::new()),
            approvals: Mutex::new(Vec::new()),
            ingest_gate: None,
            last_status: Mutex::new(RunStatus::Queued),
        }
    }

    pub fn without_preview(mut self) -> Self {
        self.preview_supported = false;
        self
    }

    pub fn with_duplicates(self, duplicates: Vec<Duplicate>) -> Self {
        *self.duplicates.lock().unwrap() = duplicates;
        self
    }

    pub fn with_fetch_script<I>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = RunStatus>,
    {
        *self.fetch_script.lock().unwrap() = statuses.into_iter().map(Ok).collect();
        self
    }

    pub fn with_fetch_results<I>(self, results: I) -> Self
    where
        I: IntoIterator<Item = BackendResult<RunStatus>>,
    {
        *self.fetch_script.lock().unwrap() = results.into_iter().collect();
        self
    }

    pub fn with_ingest_gate(mut self, gate: Arc<Notify>) -> Self {
        self.ingest_gate = Some(gate);
        self
    }

    fn next_status(&self) -> BackendResult<RunStatus> {
        let mut script = self.fetch_script.lock().unwrap();
        let result = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            match script.front() {
                Some(Ok(status)) => Ok(*status),
                Some(Err(_)) => script.pop_front().unwrap(),
                None => Ok(*self.last_status.lock().unwrap()),
            }
        };
        if let Ok(status) = &result {
            *self.last_status.lock().unwrap() = *status;
        }
        result
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn ingest(&self, _input: &IngestInput) -> BackendResult<Session> {
        let n = self.calls.ingest.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.ingest_gate {
            gate.notified().await;
        }
        Ok(Session {
            session_id: format!("sess-{}", n),
            requirement_id: Some(format!("req-{}", n)),
            title: Some("Product search".to_string()),
            actor: Some("shopper".to_string()),
            goal: None,
            ac_count: Some(2),
        })
    }

    async fn generate(
        &self,
        _session_id: &str,
        request: &GenerateRequest,
    ) -> BackendResult<Gated<GeneratedSuite>> {
        self.calls.generate.fetch_add(1, Ordering::SeqCst);
        let duplicates = self.duplicates.lock().unwrap().clone();
        if !duplicates.is_empty() && !request.allow_duplicates {
            return Ok(Gated::DuplicateConflict { duplicates });
        }
        Ok(Gated::Accepted(GeneratedSuite {
            test_cases: self.test_cases.lock().unwrap().clone(),
            duplicates,
        }))
    }

    async fn preview(
        &self,
        _session_id: &str,
        test_case_ids: &[String],
    ) -> BackendResult<PreviewResponse> {
        self.calls.preview.fetch_add(1, Ordering::SeqCst);
        if !self.preview_supported {
            return Ok(PreviewResponse::Unsupported);
        }
        Ok(PreviewResponse::Diffs(
            test_case_ids
                .iter()
                .map(|id| DiffPreview {
                    test_type: "ui".to_string(),
                    exists: false,
                    path: format!("tests/ui/{}.spec.ts", id.to_lowercase()),
                    diff_text: None,
                })
                .collect(),
        ))
    }

    async fn approve(
        &self,
        _session_id: &str,
        request: &ApproveRequest,
    ) -> BackendResult<Gated<ApprovalReceipt>> {
        self.calls.approve.fetch_add(1, Ordering::SeqCst);
        self.approvals.lock().unwrap().push(request.clone());
        let duplicates = self.duplicates.lock().unwrap().clone();
        if !duplicates.is_empty() && !request.allow_duplicates {
            return Ok(Gated::DuplicateConflict { duplicates });
        }
        Ok(Gated::Accepted(ApprovalReceipt {
            approved_count: Some(request.test_case_ids.len() as u32),
            generated_files: request
                .test_case_ids
                .iter()
                .map(|id| format!("tests/ui/{}.spec.ts", id.to_lowercase()))
                .collect(),
            test_directory: Some("tests/generated".to_string()),
            duplicates,
        }))
    }

    async fn create_run(&self, _request: &RunRequest) -> BackendResult<RunTicket> {
        let n = self.calls.create_run.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_status.lock().unwrap() = self.initial_status;
        Ok(RunTicket {
            id: format!("run-{}", n),
            status: self.initial_status,
        })
    }

    async fn refresh_run(&self, _run_id: &str) -> BackendResult<()> {
        self.calls.refresh_run.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_run(&self, run_id: &str) -> BackendResult<Run> {
        self.calls.fetch_run.fetch_add(1, Ordering::SeqCst);
        let status = self.next_status()?;
        Ok(run(run_id, status))
    }

    async fn metrics(&self) -> BackendResult<Metrics> {
        self.calls.metrics.fetch_add(1, Ordering::SeqCst);
        Ok(Metrics::zero())
    }

    async fn health(&self) -> BackendResult<HealthStatus> {
        Ok(HealthStatus {
            status: "ok".to_string(),
            service: None,
        })
    }

    async fn download_artifact(&self, _session_id: &str, _filename: &str) -> BackendResult<Vec<u8>> {
        Err(BackendError::Api {
            status: 404,
            message: "no artifacts".to_string(),
        })
    }
}

pub fn test_case(id: &str, test_type: TestType) -> TestCase {
    TestCase {
        id: id.to_string(),
        title: format!("Search scenario {}", id),
        test_type,
        priority: "P1".to_string(),
        trace_to: vec!["AC-1".to_string()],
        steps: vec![],
        preconditions: vec![],
        data: Default::default(),
        expected: vec![],
    }
}

pub fn run(run_id: &str, status: RunStatus) -> Run {
    Run {
        id: run_id.to_string(),
        status,
        created_at: Utc::now(),
        started_at: None,
        completed_at: status.is_terminal().then(Utc::now),
        session_id: None,
        requirement_id: None,
        ui_mode: None,
        api_mode: None,
        auto_pr: None,
        output: None,
        errors: None,
        error: None,
        exit_code: None,
        logs: Vec::new(),
        reports: Vec::new(),
    }
}

pub fn transient() -> BackendError {
    BackendError::Api {
        status: 503,
        message: "unavailable".to_string(),
    }
}
