use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Ingest
// ============================================================================

/// Where the requirement text comes from
#[derive(Debug, Clone, PartialEq)]
pub enum RequirementSource {
    /// Inline user story text
    Text(String),
    /// A file uploaded as-is
    File(PathBuf),
}

/// Input for the ingest stage
#[derive(Debug, Clone, PartialEq)]
pub struct IngestInput {
    pub source: RequirementSource,
    pub domain: Option<String>,
    pub tags: Vec<String>,
}

impl IngestInput {
    /// Ingest a user story given as text
    pub fn text(story: impl Into<String>) -> Self {
        Self {
            source: RequirementSource::Text(story.into()),
            domain: None,
            tags: Vec::new(),
        }
    }

    /// Ingest a requirement file
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: RequirementSource::File(path.into()),
            domain: None,
            tags: Vec::new(),
        }
    }

    /// Set the domain hint
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Add tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// JSON body for a text ingest
#[derive(Debug, Clone, Serialize)]
pub struct StoryUpload {
    pub story_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub tags: Vec<String>,
}

/// Session descriptor returned by ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub requirement_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub ac_count: Option<u32>,
}

// ============================================================================
// Test cases
// ============================================================================

/// Requested thoroughness of generated test cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Coverage {
    Basic,
    #[default]
    Comprehensive,
}

impl Coverage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Coverage::Basic => "basic",
            Coverage::Comprehensive => "comprehensive",
        }
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Coverage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Coverage::Basic),
            "comprehensive" => Ok(Coverage::Comprehensive),
            _ => Err(format!("Unknown coverage level: {}", s)),
        }
    }
}

/// Kind of a generated test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Positive,
    Negative,
    Edge,
    #[serde(other)]
    Other,
}

/// One semantic step of a test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// A generated candidate test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub test_type: TestType,
    pub priority: String,
    /// Acceptance-criteria ids this test covers
    #[serde(default, alias = "traceTo")]
    pub trace_to: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub expected: Vec<String>,
}

/// An overlap between a candidate test and an already persisted one
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Duplicate {
    pub file: String,
    pub reason: String,
}

impl Duplicate {
    pub fn new(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a call that is subject to the duplicate check.
///
/// A conflict is an expected branch, so it is a value rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Gated<T> {
    Accepted(T),
    DuplicateConflict { duplicates: Vec<Duplicate> },
}

impl<T> Gated<T> {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Gated::DuplicateConflict { .. })
    }

    pub fn accepted(self) -> Option<T> {
        match self {
            Gated::Accepted(value) => Some(value),
            Gated::DuplicateConflict { .. } => None,
        }
    }
}

/// Body of a generate call
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirement_id: Option<String>,
    pub coverage: Coverage,
    pub allow_duplicates: bool,
}

/// Successful generate response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSuite {
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub duplicates: Vec<Duplicate>,
}

// ============================================================================
// Preview and approval
// ============================================================================

/// Body of a preview call
#[derive(Debug, Clone, Serialize)]
pub struct PreviewRequest {
    pub test_case_ids: Vec<String>,
}

/// Before/after difference for one file an approval would write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffPreview {
    #[serde(rename = "type")]
    pub test_type: String,
    #[serde(default)]
    pub exists: bool,
    #[serde(alias = "preview_path")]
    pub path: String,
    #[serde(default, rename = "diff")]
    pub diff_text: Option<String>,
}

impl DiffPreview {
    /// Diff text, or a placeholder when the target file does not exist yet
    pub fn display_diff(&self) -> &str {
        self.diff_text
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or("No existing file to diff")
    }
}

/// Preview response, or the signal that the backend has no preview support
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewResponse {
    Diffs(Vec<DiffPreview>),
    Unsupported,
}

/// Body of an approve call
#[derive(Debug, Clone, Serialize)]
pub struct ApproveRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirement_id: Option<String>,
    pub test_case_ids: Vec<String>,
    pub approved: bool,
    pub allow_duplicates: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// What the backend reports after approving and synthesizing code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalReceipt {
    #[serde(default)]
    pub approved_count: Option<u32>,
    #[serde(default)]
    pub generated_files: Vec<String>,
    #[serde(default)]
    pub test_directory: Option<String>,
    #[serde(default)]
    pub duplicates: Vec<Duplicate>,
}

// ============================================================================
// Runs
// ============================================================================

/// UI execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UiMode {
    #[default]
    Real,
    Mock,
}

/// API execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    #[default]
    Mock,
    Stub,
    Real,
}

/// Environment combination for a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub ui_mode: UiMode,
    pub api_mode: ApiMode,
    pub auto_pr: bool,
    pub tags: Vec<String>,
}

impl RunOptions {
    pub fn new(ui_mode: UiMode, api_mode: ApiMode) -> Self {
        Self {
            ui_mode,
            api_mode,
            ..Default::default()
        }
    }

    /// Open a pull request when the run passes
    pub fn with_auto_pr(mut self, auto_pr: bool) -> Self {
        self.auto_pr = auto_pr;
        self
    }

    /// Restrict the run to tests carrying these tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Body of a run create call
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub session_id: String,
    pub ui_mode: UiMode,
    pub api_mode: ApiMode,
    pub auto_pr: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl RunRequest {
    pub fn new(session_id: impl Into<String>, options: &RunOptions) -> Self {
        Self {
            session_id: session_id.into(),
            ui_mode: options.ui_mode,
            api_mode: options.api_mode,
            auto_pr: options.auto_pr,
            tags: options.tags.clone(),
        }
    }
}

/// Response of a run create call
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunTicket {
    #[serde(alias = "run_id")]
    pub id: String,
    #[serde(default = "RunStatus::initial")]
    pub status: RunStatus,
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Error,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    fn initial() -> Self {
        RunStatus::Queued
    }

    /// No further transition happens from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Error
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of approved tests, as recorded by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub requirement_id: Option<String>,
    #[serde(default)]
    pub ui_mode: Option<UiMode>,
    #[serde(default)]
    pub api_mode: Option<ApiMode>,
    #[serde(default)]
    pub auto_pr: Option<bool>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub errors: Option<String>,
    /// Failure message when the runner itself crashed
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub reports: Vec<serde_json::Value>,
}

impl Run {
    /// Local view of a run right after creation, before the first poll
    pub fn from_ticket(ticket: RunTicket, request: &RunRequest) -> Self {
        Self {
            id: ticket.id,
            status: ticket.status,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            session_id: Some(request.session_id.clone()),
            requirement_id: None,
            ui_mode: Some(request.ui_mode),
            api_mode: Some(request.api_mode),
            auto_pr: Some(request.auto_pr),
            output: None,
            errors: None,
            error: None,
            exit_code: None,
            logs: Vec::new(),
            reports: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Aggregate dashboard statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub total_requirements: u64,
    #[serde(default)]
    pub total_runs: u64,
    /// Percentage of runs that completed successfully (0-100)
    #[serde(default)]
    pub pass_rate: f64,
    #[serde(default)]
    pub test_types: BTreeMap<String, u64>,
    #[serde(default, alias = "recent_runs")]
    pub history: Vec<RunSummary>,
}

impl Metrics {
    /// Snapshot shown before any run exists
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Short run record used in metrics history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(alias = "run_id")]
    pub id: String,
    pub status: RunStatus,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Backend liveness response
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
}

/// Timestamps arrive either RFC 3339 or as naive ISO-8601 values in UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw.as_deref() {
                None | Some("") => Ok(None),
                Some(s) => super::parse(s)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", s))),
            }
        }
    }
}
