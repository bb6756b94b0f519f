//! The 100ms event debouncer and target-project selection.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use donotnet_core::{CoverageMap, Graph};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Accumulated, not-yet-fired state: every project and file path touched
/// since the last fire, plus the deadline the next fire is due at.
#[derive(Debug, Default)]
pub struct DebounceState {
    pub pending_projects: HashSet<usize>,
    pub pending_files: HashSet<String>,
    deadline: Option<Instant>,
}

impl DebounceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted event, restarting the debounce window.
    pub fn record(&mut self, project_idx: usize, repo_relative_path: String) {
        self.pending_projects.insert(project_idx);
        self.pending_files.insert(repo_relative_path);
        self.deadline = Some(Instant::now() + DEBOUNCE_WINDOW);
    }

    pub fn is_due(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Snapshot and clear the accumulated sets.
    pub fn take(&mut self) -> (HashSet<usize>, HashSet<String>) {
        self.deadline = None;
        (
            std::mem::take(&mut self.pending_projects),
            std::mem::take(&mut self.pending_files),
        )
    }
}

/// What a debounce fire resolved to run, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Coverage fully covered every pending file: run the union of test
    /// projects the coverage map says those files touch.
    CoverageDerived(HashSet<usize>),
    /// No coverage map, or coverage didn't cover every pending file: fall
    /// back to `Affected(pending_projects)`, optionally narrowed to test
    /// projects.
    AffectedClosure(HashSet<usize>),
}

/// Resolve one fire of the debouncer into a target-project set.
/// `restrict_to_tests` is true for the `test` command, false for `build`.
pub fn resolve_targets(
    graph: &Graph,
    pending_projects: &HashSet<usize>,
    pending_files: &HashSet<String>,
    coverage: Option<&CoverageMap>,
    restrict_to_tests: bool,
) -> Trigger {
    if let Some(coverage) = coverage {
        let every_file_covered = !pending_files.is_empty()
            && pending_files
                .iter()
                .all(|f| !coverage.tests_for_file(f).is_empty());
        if every_file_covered {
            let mut test_projects = HashSet::new();
            for file in pending_files {
                for test_id in coverage.tests_for_file(file) {
                    if let Some(idx) = graph.index_of(&test_id) {
                        test_projects.insert(idx);
                    }
                }
            }
            return Trigger::CoverageDerived(test_projects);
        }
    }

    let changed: Vec<usize> = pending_projects.iter().copied().collect();
    let mut affected = graph.affected(&changed);
    if restrict_to_tests {
        affected.retain(|&idx| graph.project(idx).is_test);
    }
    Trigger::AffectedClosure(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use donotnet_core::project::Project;
    use std::path::PathBuf as P;

    fn project(id: &str, is_test: bool) -> Project {
        Project {
            id: P::from(id),
            name: id.to_string(),
            directory: P::from("/repo").join(id).parent().unwrap().to_path_buf(),
            references: vec![],
            packages: vec![],
            is_test,
        }
    }

    #[test]
    fn record_sets_a_deadline_and_accumulates() {
        let mut state = DebounceState::new();
        state.record(0, "Core/A.cs".to_string());
        assert!(state.deadline().is_some());
        assert_eq!(state.pending_projects.len(), 1);
    }

    #[test]
    fn take_clears_state() {
        let mut state = DebounceState::new();
        state.record(0, "Core/A.cs".to_string());
        let (projects, files) = state.take();
        assert_eq!(projects.len(), 1);
        assert_eq!(files.len(), 1);
        assert!(state.pending_projects.is_empty());
        assert!(state.deadline().is_none());
    }

    #[test]
    fn falls_back_to_affected_closure_without_coverage() {
        let root = P::from("/repo");
        let graph = Graph::build(&root, vec![project("Core/Core.csproj", false)]);
        let idx = graph.index_of("Core/Core.csproj").unwrap();
        let pending = HashSet::from([idx]);
        let trigger = resolve_targets(&graph, &pending, &HashSet::new(), None, false);
        match trigger {
            Trigger::AffectedClosure(set) => assert!(set.contains(&idx)),
            other => panic!("expected AffectedClosure, got {other:?}"),
        }
    }

    #[test]
    fn uses_coverage_union_when_every_file_is_covered() {
        let root = P::from("/repo");
        let graph = Graph::build(
            &root,
            vec![
                project("Core/Core.csproj", false),
                project("Core.Tests/Core.Tests.csproj", true),
            ],
        );
        let mut coverage = CoverageMap::new(0);
        coverage.record("Core.Tests/Core.Tests.csproj", vec!["Core/A.cs".to_string()]);
        let pending_files = HashSet::from(["Core/A.cs".to_string()]);
        let pending_projects = HashSet::new();
        let trigger = resolve_targets(&graph, &pending_projects, &pending_files, Some(&coverage), true);
        let tests_idx = graph.index_of("Core.Tests/Core.Tests.csproj").unwrap();
        match trigger {
            Trigger::CoverageDerived(set) => assert!(set.contains(&tests_idx)),
            other => panic!("expected CoverageDerived, got {other:?}"),
        }
    }
}
