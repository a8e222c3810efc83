//! State owned by one ingested requirement.

use crate::backend::{Duplicate, IngestInput, RequirementSource, Session};
use crate::error::ValidationError;

use super::collection::TestCaseCollection;
use super::preview::PendingPreview;
use super::run::RunHandle;

/// Everything downstream of an ingest. A new ingest replaces the whole scope.
#[derive(Debug)]
pub(crate) struct SessionScope {
    pub session: Session,
    pub collection: TestCaseCollection,
    /// Duplicates from the latest generate or approve attempt
    pub duplicates: Vec<Duplicate>,
    /// Duplicates the user let through with the override in this session
    pub accepted_duplicates: Vec<Duplicate>,
    /// Learned from the first preview call; `None` until then
    pub preview_supported: Option<bool>,
    pub preview: Option<PendingPreview>,
    pub run: Option<RunHandle>,
}

impl SessionScope {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            collection: TestCaseCollection::new(),
            duplicates: Vec::new(),
            accepted_duplicates: Vec::new(),
            preview_supported: None,
            preview: None,
            run: None,
        }
    }

    /// Remember duplicates admitted by an override
    pub fn accept_duplicates(&mut self, duplicates: &[Duplicate]) {
        for dup in duplicates {
            if !self.accepted_duplicates.contains(dup) {
                self.accepted_duplicates.push(dup.clone());
            }
        }
    }
}

/// Reject empty ingest input before it reaches the backend
pub async fn validate_input(input: &IngestInput) -> Result<(), ValidationError> {
    match &input.source {
        RequirementSource::Text(story) => {
            if story.trim().is_empty() {
                return Err(ValidationError::EmptyRequirement);
            }
        }
        RequirementSource::File(path) => {
            let meta = tokio::fs::metadata(path)
                .await
                .map_err(|e| ValidationError::UnreadableFile {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            if !meta.is_file() {
                return Err(ValidationError::UnreadableFile {
                    path: path.display().to_string(),
                    message: "not a regular file".to_string(),
                });
            }
            if meta.len() == 0 {
                return Err(ValidationError::EmptyRequirement);
            }
        }
    }
    Ok(())
}
