//! Generated test cases and the per-test approval selection.

use std::collections::BTreeMap;

use tracing::warn;

use crate::backend::TestCase;
use crate::error::ValidationError;

/// Candidate test cases for one session plus which of them are selected.
///
/// Selection keys are always a subset of the current test case ids. Every
/// selection change bumps [`revision`](Self::revision), which previews use to
/// detect that they went stale.
#[derive(Debug, Clone, Default)]
pub struct TestCaseCollection {
    test_cases: Vec<TestCase>,
    selection: BTreeMap<String, bool>,
    revision: u64,
}

impl TestCaseCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the candidates and select all of them
    pub fn replace(&mut self, test_cases: Vec<TestCase>) {
        let mut unique = Vec::with_capacity(test_cases.len());
        let mut selection = BTreeMap::new();
        for tc in test_cases {
            if selection.contains_key(&tc.id) {
                warn!(test_case_id = %tc.id, "Dropping repeated test case id");
                continue;
            }
            selection.insert(tc.id.clone(), true);
            unique.push(tc);
        }
        self.test_cases = unique;
        self.selection = selection;
        self.revision += 1;
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    pub fn get(&self, id: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|tc| tc.id == id)
    }

    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }

    pub fn selection(&self) -> &BTreeMap<String, bool> {
        &self.selection
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selection.get(id).copied().unwrap_or(false)
    }

    /// Select or deselect one test case
    pub fn set_selected(&mut self, id: &str, selected: bool) -> Result<(), ValidationError> {
        let slot = self
            .selection
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownTestCase { id: id.to_string() })?;
        if *slot != selected {
            *slot = selected;
            self.revision += 1;
        }
        Ok(())
    }

    /// Select or deselect every test case
    pub fn set_all(&mut self, selected: bool) {
        let mut changed = false;
        for slot in self.selection.values_mut() {
            if *slot != selected {
                *slot = selected;
                changed = true;
            }
        }
        if changed {
            self.revision += 1;
        }
    }

    /// Selected ids, in generation order
    pub fn selected_ids(&self) -> Vec<String> {
        self.test_cases
            .iter()
            .filter(|tc| self.is_selected(&tc.id))
            .map(|tc| tc.id.clone())
            .collect()
    }

    /// Counter bumped by every selection change
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TestType;

    fn tc(id: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            title: format!("Test {}", id),
            test_type: TestType::Positive,
            priority: "P1".to_string(),
            trace_to: vec!["AC-1".to_string()],
            steps: vec![],
            preconditions: vec![],
            data: Default::default(),
            expected: vec![],
        }
    }

    fn keys_subset_of_ids(c: &TestCaseCollection) -> bool {
        c.selection().keys().all(|k| c.get(k).is_some())
    }

    #[test]
    fn test_replace_selects_everything() {
        let mut c = TestCaseCollection::new();
        c.replace(vec![tc("TC-1"), tc("TC-2"), tc("TC-3")]);
        assert_eq!(c.len(), 3);
        assert_eq!(c.selected_ids(), vec!["TC-1", "TC-2", "TC-3"]);
        assert!(keys_subset_of_ids(&c));
    }

    #[test]
    fn test_replace_drops_previous_selection() {
        let mut c = TestCaseCollection::new();
        c.replace(vec![tc("TC-1"), tc("TC-2")]);
        c.set_selected("TC-1", false).unwrap();

        c.replace(vec![tc("TC-9")]);
        assert_eq!(c.selection().len(), 1);
        assert!(c.is_selected("TC-9"));
        assert!(!c.is_selected("TC-1"));
        assert!(keys_subset_of_ids(&c));
    }

    #[test]
    fn test_repeated_ids_are_dropped() {
        let mut c = TestCaseCollection::new();
        c.replace(vec![tc("TC-1"), tc("TC-1"), tc("TC-2")]);
        assert_eq!(c.len(), 2);
        assert_eq!(c.selected_ids(), vec!["TC-1", "TC-2"]);
    }

    #[test]
    fn test_unknown_id_rejected() {
        let mut c = TestCaseCollection::new();
        c.replace(vec![tc("TC-1")]);
        let err = c.set_selected("TC-404", true).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownTestCase {
                id: "TC-404".to_string()
            }
        );
        assert!(keys_subset_of_ids(&c));
    }

    #[test]
    fn test_revision_tracks_real_changes_only() {
        let mut c = TestCaseCollection::new();
        c.replace(vec![tc("TC-1"), tc("TC-2")]);
        let rev = c.revision();

        c.set_selected("TC-1", true).unwrap();
        assert_eq!(c.revision(), rev);

        c.set_selected("TC-1", false).unwrap();
        assert_eq!(c.revision(), rev + 1);

        c.set_all(false);
        assert_eq!(c.revision(), rev + 2);
        c.set_all(false);
        assert_eq!(c.revision(), rev + 2);
        assert!(c.selected_ids().is_empty());
    }
}
