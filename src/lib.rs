//! # SpecWeaver Client
//!
//! Client-side orchestrator for a human-in-the-loop acceptance-test pipeline.
//! A user story goes in; reviewed, approved and executed tests come out.
//!
//! ## Pipeline
//!
//! - **Ingest**: parse a user story (text or file) into a session
//! - **Generate**: candidate test cases, blocked by duplicates unless overridden
//! - **Preview**: diff previews of the files approval would write
//! - **Approve**: code synthesis for the confirmed selection
//! - **Run**: start a test run and poll it to a terminal status
//! - **Metrics**: aggregate run statistics, refreshed as runs change
//!
//! ## Architecture
//!
//! ```text
//! CLI / caller → Workflow (state machine, gates) → Backend trait → HttpBackend → SpecWeaver API
//!                    ↓
//!          RunController / MetricsAggregator (background polling)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use specweaver_client::backend::{Coverage, HttpBackend, IngestInput, RunOptions};
//! use specweaver_client::workflow::{Workflow, WorkflowConfig};
//! use specweaver_client::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let backend = HttpBackend::new(&config.backend, config.request.clone())?;
//!     let workflow = Workflow::open(Arc::new(backend), WorkflowConfig::from(&config.polling)).await;
//!
//!     workflow.ingest(IngestInput::text("As a shopper, I want to search...")).await?;
//!     workflow.generate(Coverage::Comprehensive, false).await?;
//!     workflow.submit_for_approval(false).await?;
//!     workflow.start_run(RunOptions::default()).await?;
//!     let run = workflow.wait_for_run().await?;
//!     println!("{}", run.status);
//!     Ok(())
//! }
//! ```

/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Backend contract, wire types and HTTP client.
pub mod backend;
/// Session workflow, run polling and metrics.
pub mod workflow;
/// Command-line interface.
pub mod cli;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use workflow::{Workflow, WorkflowConfig};
