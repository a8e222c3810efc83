//! Unit tests for the workflow context against a mocked backend.

use super::*;
use crate::backend::{ApiMode, DiffPreview, MockBackend, TestType, UiMode};
use pretty_assertions::assert_eq;

fn session() -> Session {
    Session {
        session_id: "sess-1".to_string(),
        requirement_id: Some("req-1".to_string()),
        title: Some("Product search".to_string()),
        actor: Some("shopper".to_string()),
        goal: Some("find products".to_string()),
        ac_count: Some(2),
    }
}

fn test_case(id: &str) -> TestCase {
    TestCase {
        id: id.to_string(),
        title: format!("Search {}", id),
        test_type: TestType::Positive,
        priority: "P1".to_string(),
        trace_to: vec!["AC-1".to_string()],
        steps: vec![],
        preconditions: vec![],
        data: Default::default(),
        expected: vec![],
    }
}

fn suite(ids: &[&str]) -> GeneratedSuite {
    GeneratedSuite {
        test_cases: ids.iter().map(|id| test_case(id)).collect(),
        duplicates: vec![],
    }
}

fn diff(path: &str) -> DiffPreview {
    DiffPreview {
        test_type: "ui".to_string(),
        exists: false,
        path: path.to_string(),
        diff_text: None,
    }
}

fn dup() -> Duplicate {
    Duplicate::new("tests/test_search.py", "title match: Search returns results")
}

/// Mock with the metrics call every `open` makes
fn backend() -> MockBackend {
    let mut backend = MockBackend::new();
    backend.expect_metrics().returning(|| Ok(Metrics::zero()));
    backend
}

fn expect_ingest(backend: &mut MockBackend) {
    backend
        .expect_ingest()
        .times(1)
        .returning(|_| Ok(session()));
}

fn expect_generate(backend: &mut MockBackend, ids: &'static [&'static str]) {
    backend
        .expect_generate()
        .times(1)
        .returning(move |_, _| Ok(Gated::Accepted(suite(ids))));
}

async fn open(backend: MockBackend) -> Workflow {
    Workflow::open(Arc::new(backend), WorkflowConfig::default()).await
}

async fn generated(workflow: &Workflow) {
    workflow.ingest(IngestInput::text("As a shopper...")).await.unwrap();
    let result = workflow.generate(Coverage::Comprehensive, false).await.unwrap();
    assert!(!result.is_conflict());
}

#[tokio::test]
async fn test_blank_requirement_never_reaches_backend() {
    let workflow = open(backend()).await;

    let err = workflow.ingest(IngestInput::text("  ")).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Validation(ValidationError::EmptyRequirement)
    ));
    assert_eq!(workflow.state().await, WorkflowState::Input);
}

#[tokio::test]
async fn test_generate_before_ingest_is_rejected() {
    let workflow = open(backend()).await;

    let err = workflow.generate(Coverage::Basic, false).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidTransition {
            action: Action::Generate,
            state: WorkflowState::Input
        }
    ));
}

#[tokio::test]
async fn test_generate_selects_every_test_case() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    expect_generate(&mut backend, &["TC-1", "TC-2", "TC-3"]);
    let workflow = open(backend).await;

    generated(&workflow).await;

    assert_eq!(workflow.state().await, WorkflowState::Generated);
    assert_eq!(workflow.selected_ids().await, vec!["TC-1", "TC-2", "TC-3"]);
    assert_eq!(workflow.test_cases().await.len(), 3);
}

#[tokio::test]
async fn test_generate_conflict_keeps_state() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    backend.expect_generate().times(1).returning(|_, _| {
        Ok(Gated::DuplicateConflict {
            duplicates: vec![dup()],
        })
    });
    let workflow = open(backend).await;
    workflow.ingest(IngestInput::text("As a shopper...")).await.unwrap();

    let result = workflow.generate(Coverage::Comprehensive, false).await.unwrap();

    assert_eq!(
        result,
        Gated::DuplicateConflict {
            duplicates: vec![dup()]
        }
    );
    assert_eq!(workflow.state().await, WorkflowState::Parsed);
    assert!(workflow.test_cases().await.is_empty());
    assert_eq!(workflow.duplicates().await, vec![dup()]);
}

#[tokio::test]
async fn test_duplicates_in_success_body_are_guarded() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    backend.expect_generate().times(1).returning(|_, _| {
        let mut suite = suite(&["TC-1"]);
        suite.duplicates = vec![dup()];
        Ok(Gated::Accepted(suite))
    });
    let workflow = open(backend).await;
    workflow.ingest(IngestInput::text("As a shopper...")).await.unwrap();

    let result = workflow.generate(Coverage::Comprehensive, false).await.unwrap();

    assert!(result.is_conflict());
    assert_eq!(workflow.state().await, WorkflowState::Parsed);
}

#[tokio::test]
async fn test_empty_selection_makes_no_approve_call() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    expect_generate(&mut backend, &["TC-1", "TC-2"]);
    backend.expect_approve().times(0);
    backend.expect_preview().times(0);
    let workflow = open(backend).await;
    generated(&workflow).await;

    workflow.select_all(false).await.unwrap();

    let err = workflow.approve(false).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Validation(ValidationError::SelectionEmpty)
    ));
    let err = workflow.request_preview().await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Validation(ValidationError::SelectionEmpty)
    ));
    assert_eq!(workflow.state().await, WorkflowState::Generated);
}

#[tokio::test]
async fn test_unknown_test_case_selection_rejected() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    expect_generate(&mut backend, &["TC-1"]);
    let workflow = open(backend).await;
    generated(&workflow).await;

    let err = workflow.set_selected("TC-9", true).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Validation(ValidationError::UnknownTestCase { .. })
    ));
}

#[tokio::test]
async fn test_confirm_submits_previewed_ids() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    expect_generate(&mut backend, &["TC-1", "TC-2", "TC-3"]);
    backend
        .expect_preview()
        .withf(|session_id, ids| session_id == "sess-1" && ids == ["TC-1", "TC-3"])
        .times(1)
        .returning(|_, _| Ok(PreviewResponse::Diffs(vec![diff("tests/ui/search.spec.ts")])));
    backend
        .expect_approve()
        .withf(|_, request| {
            request.test_case_ids == ["TC-1", "TC-3"]
                && request.approved
                && request.requirement_id.as_deref() == Some("req-1")
        })
        .times(1)
        .returning(|_, _| {
            Ok(Gated::Accepted(ApprovalReceipt {
                approved_count: Some(2),
                generated_files: vec!["tests/ui/search.spec.ts".to_string()],
                ..Default::default()
            }))
        });
    let workflow = open(backend).await;
    generated(&workflow).await;

    workflow.set_selected("TC-2", false).await.unwrap();
    let outcome = workflow.request_preview().await.unwrap();
    assert_eq!(outcome, PreviewOutcome::Ready(vec![diff("tests/ui/search.spec.ts")]));
    assert_eq!(workflow.state().await, WorkflowState::Previewing);

    let receipt = workflow.confirm(false).await.unwrap().accepted().unwrap();
    assert_eq!(receipt.approved_count, Some(2));
    assert_eq!(workflow.state().await, WorkflowState::Approved);
    assert!(workflow.pending_preview().await.is_none());
}

#[tokio::test]
async fn test_selection_change_makes_preview_stale() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    expect_generate(&mut backend, &["TC-1", "TC-2"]);
    backend
        .expect_preview()
        .times(1)
        .returning(|_, _| Ok(PreviewResponse::Diffs(vec![])));
    backend.expect_approve().times(0);
    let workflow = open(backend).await;
    generated(&workflow).await;

    workflow.request_preview().await.unwrap();
    workflow.set_selected("TC-1", false).await.unwrap();

    let err = workflow.confirm(false).await.unwrap_err();
    assert!(matches!(err, WorkflowError::PreviewStale));
    assert_eq!(workflow.state().await, WorkflowState::Previewing);
}

#[tokio::test]
async fn test_cancel_preview_then_direct_approve_requires_preview() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    expect_generate(&mut backend, &["TC-1"]);
    backend
        .expect_preview()
        .times(1)
        .returning(|_, _| Ok(PreviewResponse::Diffs(vec![])));
    backend.expect_approve().times(0);
    let workflow = open(backend).await;
    generated(&workflow).await;

    workflow.request_preview().await.unwrap();
    workflow.cancel_preview().await.unwrap();
    assert_eq!(workflow.state().await, WorkflowState::Generated);

    let err = workflow.approve(false).await.unwrap_err();
    assert!(matches!(err, WorkflowError::PreviewRequired));
}

#[tokio::test]
async fn test_confirm_without_preview_is_rejected() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    expect_generate(&mut backend, &["TC-1"]);
    let workflow = open(backend).await;
    generated(&workflow).await;

    let err = workflow.confirm(false).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidTransition {
            action: Action::ConfirmApproval,
            state: WorkflowState::Generated
        }
    ));
}

#[tokio::test]
async fn test_unsupported_preview_falls_back_to_approve() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    expect_generate(&mut backend, &["TC-1"]);
    backend
        .expect_preview()
        .times(1)
        .returning(|_, _| Ok(PreviewResponse::Unsupported));
    backend
        .expect_approve()
        .times(1)
        .returning(|_, _| Ok(Gated::Accepted(ApprovalReceipt::default())));
    let workflow = open(backend).await;
    generated(&workflow).await;

    let step = workflow.submit_for_approval(false).await.unwrap();

    assert_eq!(step, ApprovalStep::Approved(ApprovalReceipt::default()));
    assert_eq!(workflow.state().await, WorkflowState::Approved);
}

#[tokio::test]
async fn test_approve_conflict_then_override_records_accepted_set() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    expect_generate(&mut backend, &["TC-1"]);
    backend
        .expect_preview()
        .returning(|_, _| Ok(PreviewResponse::Unsupported));
    backend
        .expect_approve()
        .withf(|_, request| !request.allow_duplicates)
        .times(1)
        .returning(|_, _| {
            Ok(Gated::DuplicateConflict {
                duplicates: vec![dup()],
            })
        });
    backend
        .expect_approve()
        .withf(|_, request| request.allow_duplicates)
        .times(1)
        .returning(|_, _| {
            Ok(Gated::Accepted(ApprovalReceipt {
                duplicates: vec![dup()],
                ..Default::default()
            }))
        });
    let workflow = open(backend).await;
    generated(&workflow).await;

    let step = workflow.submit_for_approval(false).await.unwrap();
    assert_eq!(
        step,
        ApprovalStep::DuplicateConflict {
            duplicates: vec![dup()]
        }
    );
    assert_eq!(workflow.state().await, WorkflowState::Generated);
    assert!(workflow.accepted_duplicates().await.is_empty());

    let result = workflow.approve(true).await.unwrap();
    assert!(!result.is_conflict());
    assert_eq!(workflow.state().await, WorkflowState::Approved);
    assert_eq!(workflow.accepted_duplicates().await, vec![dup()]);
}

#[tokio::test]
async fn test_duplicates_in_body_covered_by_accepted_set() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    backend
        .expect_generate()
        .withf(|_, request| request.allow_duplicates)
        .times(1)
        .returning(|_, _| {
            Ok(Gated::Accepted(GeneratedSuite {
                duplicates: vec![dup()],
                ..suite(&["TC-1"])
            }))
        });
    backend
        .expect_preview()
        .returning(|_, _| Ok(PreviewResponse::Unsupported));
    backend
        .expect_approve()
        .withf(|_, request| !request.allow_duplicates)
        .times(1)
        .returning(|_, _| {
            Ok(Gated::Accepted(ApprovalReceipt {
                duplicates: vec![dup()],
                ..Default::default()
            }))
        });
    let workflow = open(backend).await;
    workflow.ingest(IngestInput::text("As a shopper...")).await.unwrap();
    workflow.generate(Coverage::Basic, true).await.unwrap();

    let step = workflow.submit_for_approval(false).await.unwrap();

    assert!(matches!(step, ApprovalStep::Approved(_)));
    assert_eq!(workflow.state().await, WorkflowState::Approved);
}

#[tokio::test]
async fn test_start_run_requires_approval() {
    let mut backend = backend();
    expect_ingest(&mut backend);
    expect_generate(&mut backend, &["TC-1"]);
    backend.expect_create_run().times(0);
    let workflow = open(backend).await;
    generated(&workflow).await;

    let err = workflow
        .start_run(RunOptions::new(UiMode::Mock, ApiMode::Mock))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidTransition {
            action: Action::StartRun,
            state: WorkflowState::Generated
        }
    ));
}

#[tokio::test]
async fn test_wait_for_run_without_run() {
    let workflow = open(backend()).await;
    let err = workflow.wait_for_run().await.unwrap_err();
    assert!(matches!(err, WorkflowError::NoActiveRun));
}

#[tokio::test]
async fn test_open_loads_metrics() {
    let mut backend = MockBackend::new();
    backend.expect_metrics().times(1).returning(|| {
        Ok(Metrics {
            total_runs: 4,
            pass_rate: 75.0,
            ..Metrics::zero()
        })
    });
    let workflow = open(backend).await;

    let snapshot = workflow.metrics_snapshot().await;
    assert_eq!(snapshot.total_runs, 4);
    assert_eq!(snapshot.pass_rate, 75.0);
}
