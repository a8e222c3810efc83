//! Command-line interface.
//!
//! Thin commands over the [`Backend`] for inspection, plus `full`, which drives
//! one story through the whole workflow.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::backend::{
    ApiMode, Backend, Coverage, DiffPreview, Duplicate, Gated, IngestInput, Metrics, Run,
    RunOptions, TestCase, UiMode,
};
use crate::config::Config;
use crate::workflow::{ApprovalStep, Workflow, WorkflowConfig};

/// SpecWeaver client
#[derive(Parser, Debug)]
#[command(name = "specweaver", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Check that the backend is up
    Health,

    /// Show aggregate run metrics
    Metrics,

    /// Show the current record of a run
    RunStatus {
        /// Run id
        run_id: String,
    },

    /// Download a generated artifact
    Artifact {
        /// Session id the artifact belongs to
        session: String,

        /// Artifact file name
        file: String,

        /// Output path (defaults to the file name)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Ingest a story and take it through generate, approve and run
    Full {
        /// User story text
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        story: Option<String>,

        /// File containing the user story
        #[arg(long)]
        file: Option<PathBuf>,

        /// Domain hint for the parser
        #[arg(long)]
        domain: Option<String>,

        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Test generation coverage
        #[arg(long, value_enum, default_value = "comprehensive")]
        coverage: Coverage,

        /// Proceed even when duplicate tests exist
        #[arg(long)]
        allow_duplicates: bool,

        /// UI execution mode
        #[arg(long, value_enum, default_value = "real")]
        ui_mode: UiMode,

        /// API execution mode
        #[arg(long, value_enum, default_value = "mock")]
        api_mode: ApiMode,

        /// Open a pull request when the run passes
        #[arg(long)]
        auto_pr: bool,

        /// Approve previews without asking
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a CLI command.
pub async fn execute_command(
    command: Commands,
    backend: Arc<dyn Backend>,
    config: &Config,
) -> CliResult {
    match command {
        Commands::Health => execute_health(backend.as_ref()).await,
        Commands::Metrics => execute_metrics(backend.as_ref()).await,
        Commands::RunStatus { run_id } => execute_run_status(backend.as_ref(), &run_id).await,
        Commands::Artifact { session, file, out } => {
            execute_artifact(backend.as_ref(), &session, &file, out).await
        }
        Commands::Full {
            story,
            file,
            domain,
            tags,
            coverage,
            allow_duplicates,
            ui_mode,
            api_mode,
            auto_pr,
            yes,
        } => {
            let input = match (story, file) {
                (Some(story), _) => IngestInput::text(story),
                (None, Some(path)) => IngestInput::file(path),
                (None, None) => return CliResult::error("Provide --story or --file"),
            };
            let input = match domain {
                Some(domain) => input.with_domain(domain),
                None => input,
            }
            .with_tags(tags);
            let options = RunOptions::new(ui_mode, api_mode).with_auto_pr(auto_pr);
            let workflow =
                Workflow::open(backend, WorkflowConfig::from(&config.polling)).await;

            let result = execute_full(&workflow, input, coverage, allow_duplicates, options, yes)
                .await;
            workflow.dispose().await;
            result
        }
    }
}

async fn execute_health(backend: &dyn Backend) -> CliResult {
    match backend.health().await {
        Ok(health) => CliResult::success(format!(
            "Backend {} ({})",
            health.status,
            health.service.as_deref().unwrap_or("unknown service")
        )),
        Err(e) => CliResult::error(format!("Backend unreachable: {}", e)),
    }
}

async fn execute_metrics(backend: &dyn Backend) -> CliResult {
    match backend.metrics().await {
        Ok(metrics) => CliResult::success(format_metrics(&metrics)),
        Err(e) => CliResult::error(format!("Failed to load metrics: {}", e)),
    }
}

async fn execute_run_status(backend: &dyn Backend, run_id: &str) -> CliResult {
    match backend.fetch_run(run_id).await {
        Ok(run) => CliResult::success(format_run(&run)),
        Err(e) => CliResult::error(format!("Failed to load run {}: {}", run_id, e)),
    }
}

async fn execute_artifact(
    backend: &dyn Backend,
    session: &str,
    file: &str,
    out: Option<PathBuf>,
) -> CliResult {
    let bytes = match backend.download_artifact(session, file).await {
        Ok(bytes) => bytes,
        Err(e) => return CliResult::error(format!("Failed to download {}: {}", file, e)),
    };

    let out = out.unwrap_or_else(|| PathBuf::from(file));
    match tokio::fs::write(&out, &bytes).await {
        Ok(()) => CliResult::success(format!("Wrote {} bytes to {}", bytes.len(), out.display())),
        Err(e) => CliResult::error(format!("Failed to write {}: {}", out.display(), e)),
    }
}

async fn execute_full(
    workflow: &Workflow,
    input: IngestInput,
    coverage: Coverage,
    allow_duplicates: bool,
    options: RunOptions,
    yes: bool,
) -> CliResult {
    let mut output = String::new();

    let session = match workflow.ingest(input).await {
        Ok(session) => session,
        Err(e) => return CliResult::error(format!("Ingest failed: {}", e)),
    };
    output.push_str(&format!("Session: {}\n", session.session_id));
    if let Some(title) = &session.title {
        output.push_str(&format!("  Title: {}\n", title));
    }
    if let Some(count) = session.ac_count {
        output.push_str(&format!("  Acceptance criteria: {}\n", count));
    }

    let suite = match workflow.generate(coverage, allow_duplicates).await {
        Ok(Gated::Accepted(suite)) => suite,
        Ok(Gated::DuplicateConflict { duplicates }) => {
            output.push_str(&format_duplicates(&duplicates));
            output.push_str("Re-run with --allow-duplicates to proceed.\n");
            return CliResult::error(output);
        }
        Err(e) => return CliResult::error(format!("{}Generate failed: {}", output, e)),
    };
    output.push_str(&format_test_cases(&suite.test_cases));

    let receipt = match workflow.submit_for_approval(allow_duplicates).await {
        Ok(ApprovalStep::Approved(receipt)) => receipt,
        Ok(ApprovalStep::DuplicateConflict { duplicates }) => {
            output.push_str(&format_duplicates(&duplicates));
            return CliResult::error(output);
        }
        Ok(ApprovalStep::AwaitingConfirmation(diffs)) => {
            output.push_str(&format_diffs(&diffs));

            if !yes {
                // The prompt shows the report so far; it is not repeated in the result.
                let shown = std::mem::take(&mut output);
                if !ask(prompt_text(&shown, "Approve these changes?")).await {
                    if let Err(e) = workflow.cancel_preview().await {
                        return CliResult::error(format!("Cancel failed: {}", e));
                    }
                    return CliResult::success("Approval cancelled");
                }
            }
            match workflow.confirm(allow_duplicates).await {
                Ok(Gated::Accepted(receipt)) => receipt,
                Ok(Gated::DuplicateConflict { duplicates }) => {
                    return CliResult::error(format_duplicates(&duplicates));
                }
                Err(e) => return CliResult::error(format!("Approval failed: {}", e)),
            }
        }
        Err(e) => return CliResult::error(format!("{}Approval failed: {}", output, e)),
    };
    output.push_str(&format!(
        "Approved: {} file(s) generated\n",
        receipt.generated_files.len()
    ));
    for file in &receipt.generated_files {
        output.push_str(&format!("  {}\n", file));
    }

    let run = match workflow.start_run(options).await {
        Ok(run) => run,
        Err(e) => return CliResult::error(format!("{}Run failed to start: {}", output, e)),
    };
    output.push_str(&format!("Run {} {}\n", run.id, run.status));

    let run = match workflow.wait_for_run().await {
        Ok(run) => run,
        Err(e) => return CliResult::error(format!("{}{}", output, e)),
    };
    output.push('\n');
    output.push_str(&format_run(&run));
    output.push('\n');
    let metrics = workflow.metrics_snapshot().await;
    output.push_str(&format_metrics(&metrics));

    if run.status.is_success() {
        CliResult::success(output)
    } else {
        CliResult::error(output)
    }
}

fn prompt_text(report: &str, question: &str) -> String {
    format!("{}{} [y/N] ", report, question)
}

/// Yes/no prompt on stdin. Anything but y/yes is a no.
async fn ask(prompt: String) -> bool {
    let answer = tokio::task::spawn_blocking(move || {
        print!("{}", prompt);
        io::stdout().flush().ok();
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok();
        line
    })
    .await
    .unwrap_or_default();

    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn format_test_cases(test_cases: &[TestCase]) -> String {
    let mut output = format!("\nGenerated {} test case(s)\n", test_cases.len());
    for tc in test_cases {
        output.push_str(&format!(
            "  [{}] {} ({:?}, {})",
            tc.id, tc.title, tc.test_type, tc.priority
        ));
        if !tc.trace_to.is_empty() {
            output.push_str(&format!(" -> {}", tc.trace_to.join(", ")));
        }
        output.push('\n');
    }
    output
}

fn format_duplicates(duplicates: &[Duplicate]) -> String {
    let mut output = format!("\nDuplicate tests found ({})\n", duplicates.len());
    for dup in duplicates {
        output.push_str(&format!("  {}: {}\n", dup.file, dup.reason));
    }
    output
}

fn format_diffs(diffs: &[DiffPreview]) -> String {
    let mut output = format!("\nPreview of {} file(s)\n", diffs.len());
    for diff in diffs {
        let marker = if diff.exists { "modified" } else { "new" };
        output.push_str(&format!("--- {} ({}, {})\n", diff.path, diff.test_type, marker));
        output.push_str(diff.display_diff());
        output.push('\n');
    }
    output
}

fn format_run(run: &Run) -> String {
    let mut output = format!("Run {}\n", run.id);
    output.push_str(&format!("  Status:  {}\n", run.status));
    output.push_str(&format!("  Created: {}\n", run.created_at.to_rfc3339()));
    if let Some(completed) = run.completed_at {
        output.push_str(&format!("  Completed: {}\n", completed.to_rfc3339()));
    }
    if let Some(code) = run.exit_code {
        output.push_str(&format!("  Exit code: {}\n", code));
    }
    if let Some(error) = &run.error {
        output.push_str(&format!("  Error: {}\n", error));
    }
    output
}

fn format_metrics(metrics: &Metrics) -> String {
    let mut output = String::from("Metrics\n");
    output.push_str(&format!("  Requirements: {}\n", metrics.total_requirements));
    output.push_str(&format!("  Runs:         {}\n", metrics.total_runs));
    output.push_str(&format!("  Pass rate:    {:.1}%\n", metrics.pass_rate));
    for (kind, count) in &metrics.test_types {
        output.push_str(&format!("  {:<13} {}\n", format!("{}:", kind), count));
    }
    if !metrics.history.is_empty() {
        output.push_str("  Recent runs:\n");
        for summary in &metrics.history {
            output.push_str(&format!("    {} {}\n", summary.id, summary.status));
        }
    }
    output
}
