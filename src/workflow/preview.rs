//! Diff preview negotiation before approval.

use crate::backend::{ApprovalReceipt, DiffPreview, Duplicate};

/// Result of asking the backend for previews
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewOutcome {
    /// Previews to show; a confirm or cancel must follow
    Ready(Vec<DiffPreview>),
    /// The backend cannot preview; approve directly
    Unsupported,
}

/// Result of [`Workflow::submit_for_approval`](super::Workflow::submit_for_approval)
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalStep {
    /// Previews are pending a confirm or cancel
    AwaitingConfirmation(Vec<DiffPreview>),
    /// Preview unsupported, approval went straight through
    Approved(ApprovalReceipt),
    /// Preview unsupported, direct approval hit duplicates
    DuplicateConflict { duplicates: Vec<Duplicate> },
}

/// A preview shown to the user, waiting for a decision.
///
/// Holds the exact id set that was previewed. Confirm must submit that set,
/// and only while the selection is unchanged since the preview.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPreview {
    submitted_ids: Vec<String>,
    diffs: Vec<DiffPreview>,
    selection_revision: u64,
}

impl PendingPreview {
    pub fn new(submitted_ids: Vec<String>, diffs: Vec<DiffPreview>, selection_revision: u64) -> Self {
        Self {
            submitted_ids,
            diffs,
            selection_revision,
        }
    }

    pub fn submitted_ids(&self) -> &[String] {
        &self.submitted_ids
    }

    pub fn diffs(&self) -> &[DiffPreview] {
        &self.diffs
    }

    /// False once the selection changed after the preview was taken
    pub fn is_current(&self, selection_revision: u64) -> bool {
        self.selection_revision == selection_revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_preview_staleness() {
        let preview = PendingPreview::new(
            vec!["TC-1".to_string(), "TC-2".to_string()],
            vec![DiffPreview {
                test_type: "feature".to_string(),
                exists: false,
                path: "tests/features/search.feature".to_string(),
                diff_text: None,
            }],
            4,
        );

        assert!(preview.is_current(4));
        assert!(!preview.is_current(5));
        assert_eq!(preview.submitted_ids(), ["TC-1", "TC-2"]);
        assert_eq!(preview.diffs().len(), 1);
    }
}
