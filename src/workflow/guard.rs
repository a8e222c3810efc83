//! Duplicate-conflict policy.

use crate::backend::Duplicate;

/// Verdict on a duplicate finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Block,
}

/// Decides whether duplicates stop progress.
///
/// Pure and stage-agnostic: generate and approve feed it the same inputs and
/// get the same verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateGuard;

impl DuplicateGuard {
    pub fn decide(duplicates: &[Duplicate], allow_duplicates: bool) -> GuardDecision {
        if duplicates.is_empty() || allow_duplicates {
            GuardDecision::Allow
        } else {
            GuardDecision::Block
        }
    }

    /// True when every duplicate in `found` was already accepted with the
    /// override earlier in the session. An empty `found` is never covered.
    pub fn covers(accepted: &[Duplicate], found: &[Duplicate]) -> bool {
        !found.is_empty() && found.iter().all(|dup| accepted.contains(dup))
    }
}
