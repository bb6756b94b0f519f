//! Test-filter derivation.
//!
//! Turns "what changed" plus "what coverage we know about" into a decision,
//! per test project, of whether to run it at all, and if so with what
//! user-supplied filter expression layered on top.

use std::collections::HashSet;

use regex::Regex;

use crate::coverage::CoverageMap;
use crate::graph::Graph;

/// The derived instruction for a single test project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestFilter {
    /// Run every test in the project, optionally narrowed by a
    /// user-supplied filter expression.
    RunAll { user_filter: Option<String> },
    /// Run only the named tests (as derived from coverage), further
    /// narrowed by a user-supplied filter expression if present.
    RunSubset {
        tests: HashSet<String>,
        user_filter: Option<String>,
    },
    /// Skip the project entirely this invocation.
    SkipAll,
}

/// Why a project was skipped or narrowed — surfaced for `--explain`-style
/// diagnostics and for the watch loop's status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    DirectlyChanged,
    AffectedByDependency,
    NoCoverageInformation,
    CoverageExcludesProject,
    UserFilterContradictsCoverage,
}

#[derive(Debug, Clone)]
pub struct Derivation {
    pub filter: TestFilter,
    pub reason: FilterReason,
}

/// A named rule that derives a narrower test filter from a set of changed
/// files (spec glossary "Heuristic"), selected via `--heuristics NAME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristic {
    /// If a changed file is itself a test source file, run only the class
    /// it declares rather than falling back to the full coverage-derived
    /// (or run-all) decision.
    TestFileOnly,
}

impl Heuristic {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "TestFileOnly" => Some(Heuristic::TestFileOnly),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Heuristic::TestFileOnly => "TestFileOnly",
        }
    }
}

/// True iff `path`'s file stem itself looks like a test class (the same
/// name-suffix rule `Project::name_suggests_test` applies to project
/// names, applied here to a single source file).
fn is_test_source_file(path: &str) -> bool {
    let stem = std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    crate::project::Project::name_suggests_test(stem)
}

fn class_name_from_path(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Derive the filter for `test_project_idx` given the affected set (from
/// `Graph::affected`), the coverage map (if one exists), and the user's
/// own `--filter` expression.
///
/// Decision order:
/// 1. If the project is not in `affected`, skip it — nothing it could
///    observe changed.
/// 2. If there is no coverage information for this project yet (never
///    run, or the map predates it), run all tests: we have no basis to
///    narrow, and under-running is worse than over-running.
/// 3. Otherwise compute the project's covered tests touched by the
///    changed-file set; if that's empty, the coverage map says this
///    project's tests don't depend on what changed, so skip it. If
///    non-empty, run that subset.
/// 4. A user-supplied filter is always AND-combined with the derived
///    filter, never replaces it. If the user's filter and the coverage-
///    derived subset have empty intersection, that's flagged as a
///    contradiction but the user's explicit request still wins (spec
///    §4.4: explicit user intent overrides derived heuristics).
pub fn derive(
    graph: &Graph,
    test_project_idx: usize,
    changed_files: &[String],
    affected: &HashSet<usize>,
    coverage: Option<&CoverageMap>,
    user_filter: Option<&str>,
) -> Derivation {
    derive_with_heuristic(
        graph,
        test_project_idx,
        changed_files,
        affected,
        coverage,
        user_filter,
        None,
    )
}

/// Same as [`derive`], but applies a configured heuristic ahead of the
/// coverage-based decision. A heuristic only ever narrows what `derive`
/// would otherwise choose to run — it never widens it and never overrides
/// an "unaffected, skip" verdict.
pub fn derive_with_heuristic(
    graph: &Graph,
    test_project_idx: usize,
    changed_files: &[String],
    affected: &HashSet<usize>,
    coverage: Option<&CoverageMap>,
    user_filter: Option<&str>,
    heuristic: Option<Heuristic>,
) -> Derivation {
    let project_id = graph.project(test_project_idx).id_str();

    if !affected.contains(&test_project_idx) {
        return Derivation {
            filter: TestFilter::SkipAll,
            reason: FilterReason::NoCoverageInformation,
        };
    }

    if let Some(Heuristic::TestFileOnly) = heuristic {
        let own_classes: HashSet<String> = changed_files
            .iter()
            .filter(|f| is_test_source_file(f))
            .map(|f| class_name_from_path(f))
            .collect();
        if !own_classes.is_empty() {
            return Derivation {
                filter: TestFilter::RunSubset {
                    tests: own_classes,
                    user_filter: user_filter.map(str::to_string),
                },
                reason: FilterReason::DirectlyChanged,
            };
        }
    }

    let Some(coverage) = coverage else {
        return Derivation {
            filter: TestFilter::RunAll {
                user_filter: user_filter.map(str::to_string),
            },
            reason: FilterReason::DirectlyChanged,
        };
    };

    if !coverage.test_to_files.contains_key(&project_id) {
        return Derivation {
            filter: TestFilter::RunAll {
                user_filter: user_filter.map(str::to_string),
            },
            reason: FilterReason::NoCoverageInformation,
        };
    }

    let touched = coverage.tests_for_changed(changed_files);
    let project_tests: HashSet<String> = coverage
        .test_to_files
        .get(&project_id)
        .cloned()
        .unwrap_or_default();

    let relevant: HashSet<String> = project_tests
        .intersection(&touched)
        .cloned()
        .collect();

    if relevant.is_empty() {
        return Derivation {
            filter: TestFilter::SkipAll,
            reason: FilterReason::CoverageExcludesProject,
        };
    }

    let reason = if changed_files
        .iter()
        .any(|f| coverage.tests_for_file(f).is_empty())
    {
        FilterReason::AffectedByDependency
    } else {
        FilterReason::DirectlyChanged
    };

    Derivation {
        filter: TestFilter::RunSubset {
            tests: relevant,
            user_filter: user_filter.map(str::to_string),
        },
        reason,
    }
}

/// Render a coverage-derived test subset as a `dotnet test --filter`
/// expression: `FullyQualifiedName~A | FullyQualifiedName~B | ...` (spec
/// §4.4). Order is sorted for determinism (the set itself has none).
pub fn to_driver_expression(tests: &HashSet<String>) -> String {
    let mut sorted: Vec<&String> = tests.iter().collect();
    sorted.sort();
    sorted
        .into_iter()
        .map(|t| format!("FullyQualifiedName~{t}"))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Combine a user-supplied filter expression with a derived one via AND,
/// `(user) & (derived)`. Either side may be absent.
pub fn combine_filters(user: Option<&str>, derived: Option<&str>) -> Option<String> {
    match (user, derived) {
        (Some(u), Some(d)) => Some(format!("({u}) & ({d})")),
        (Some(u), None) => Some(u.to_string()),
        (None, Some(d)) => Some(d.to_string()),
        (None, None) => None,
    }
}

/// Looks for `Category=X` opposed by `Category!=X` (or vice versa) between
/// the user's filter and a derived trait filter — the combination would
/// exclude every test (contradictory-category detection).
pub fn category_contradiction(user_filter: &str, derived_filter: &str) -> bool {
    let categories = |expr: &str, negate: bool| -> HashSet<String> {
        let re = Regex::new(if negate { r"Category!=([\w.]+)" } else { r"Category=([\w.]+)" }).unwrap();
        re.captures_iter(expr).map(|c| c[1].to_string()).collect()
    };
    let user_pos = categories(user_filter, false);
    let user_neg = categories(user_filter, true);
    let derived_pos = categories(derived_filter, false);
    let derived_neg = categories(derived_filter, true);

    !user_pos.is_disjoint(&derived_neg) || !user_neg.is_disjoint(&derived_pos)
}

/// Contradiction detection: true iff the user supplied an explicit filter
/// naming specific tests and none of those names appear in the
/// coverage-derived subset. The derived filter still wins over the user's
/// narrower intent being silently ignored — callers surface this as a
/// warning, not an error.
/// Pull `FullyQualifiedName~X` / `FullyQualifiedName=X` test names out of a
/// user-supplied filter expression, for contradiction-checking against a
/// coverage-derived subset.
pub fn extract_named_tests(user_filter: &str) -> Vec<String> {
    let re = Regex::new(r"FullyQualifiedName[~=]([\w.]+)").unwrap();
    re.captures_iter(user_filter).map(|c| c[1].to_string()).collect()
}

pub fn user_filter_contradicts(filter: &TestFilter, user_named_tests: &[String]) -> bool {
    match filter {
        TestFilter::RunSubset { tests, .. } => {
            !user_named_tests.is_empty()
                && user_named_tests.iter().all(|name| !tests.contains(name))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;
    use std::path::PathBuf;

    fn project(id: &str, is_test: bool) -> Project {
        Project {
            id: PathBuf::from(id),
            name: id.to_string(),
            directory: PathBuf::from("/repo"),
            references: vec![],
            packages: vec![],
            is_test,
        }
    }

    fn build_graph() -> Graph {
        let root = PathBuf::from("/repo");
        Graph::build(&root, vec![project("Core.Tests/Core.Tests.csproj", true)])
    }

    #[test]
    fn unaffected_project_is_skipped() {
        let graph = build_graph();
        let idx = graph.index_of("Core.Tests/Core.Tests.csproj").unwrap();
        let affected = HashSet::new();
        let d = derive(&graph, idx, &[], &affected, None, None);
        assert_eq!(d.filter, TestFilter::SkipAll);
    }

    #[test]
    fn no_coverage_information_runs_all() {
        let graph = build_graph();
        let idx = graph.index_of("Core.Tests/Core.Tests.csproj").unwrap();
        let affected = HashSet::from([idx]);
        let d = derive(&graph, idx, &[], &affected, None, None);
        assert_eq!(d.filter, TestFilter::RunAll { user_filter: None });
    }

    #[test]
    fn coverage_excludes_project_when_no_overlap() {
        let graph = build_graph();
        let idx = graph.index_of("Core.Tests/Core.Tests.csproj").unwrap();
        let affected = HashSet::from([idx]);
        let mut coverage = CoverageMap::new(0);
        coverage.record("Core.Tests/Core.Tests.csproj", vec!["Other.cs".to_string()]);
        let d = derive(
            &graph,
            idx,
            &["Changed.cs".to_string()],
            &affected,
            Some(&coverage),
            None,
        );
        assert_eq!(d.filter, TestFilter::SkipAll);
        assert_eq!(d.reason, FilterReason::CoverageExcludesProject);
    }

    #[test]
    fn coverage_subset_is_derived_when_overlap_exists() {
        let graph = build_graph();
        let idx = graph.index_of("Core.Tests/Core.Tests.csproj").unwrap();
        let affected = HashSet::from([idx]);
        let mut coverage = CoverageMap::new(0);
        coverage.record("Core.Tests/Core.Tests.csproj", vec!["Changed.cs".to_string()]);
        let d = derive(
            &graph,
            idx,
            &["Changed.cs".to_string()],
            &affected,
            Some(&coverage),
            None,
        );
        match d.filter {
            TestFilter::RunSubset { tests, .. } => assert!(tests.contains("Core.Tests/Core.Tests.csproj")),
            other => panic!("expected RunSubset, got {other:?}"),
        }
    }

    #[test]
    fn user_filter_is_and_combined_not_replacing() {
        let graph = build_graph();
        let idx = graph.index_of("Core.Tests/Core.Tests.csproj").unwrap();
        let affected = HashSet::from([idx]);
        let d = derive(&graph, idx, &[], &affected, None, Some("Namespace.Foo"));
        assert_eq!(
            d.filter,
            TestFilter::RunAll {
                user_filter: Some("Namespace.Foo".to_string())
            }
        );
    }

    #[test]
    fn driver_expression_is_sorted_and_or_joined() {
        let mut tests = HashSet::new();
        tests.insert("Ns.ClassB".to_string());
        tests.insert("Ns.ClassA".to_string());
        assert_eq!(
            to_driver_expression(&tests),
            "FullyQualifiedName~Ns.ClassA | FullyQualifiedName~Ns.ClassB"
        );
    }

    #[test]
    fn combine_filters_ands_both_sides() {
        let combined = combine_filters(Some("Category=Fast"), Some("FullyQualifiedName~Ns.A"));
        assert_eq!(combined.as_deref(), Some("(Category=Fast) & (FullyQualifiedName~Ns.A)"));
        assert_eq!(combine_filters(None, Some("d")).as_deref(), Some("d"));
        assert_eq!(combine_filters(Some("u"), None).as_deref(), Some("u"));
        assert_eq!(combine_filters(None, None), None);
    }

    #[test]
    fn detects_contradictory_category_filters() {
        assert!(category_contradiction("Category=Slow", "Category!=Slow"));
        assert!(!category_contradiction("Category=Slow", "Category=Slow"));
    }

    #[test]
    fn test_file_only_heuristic_narrows_to_the_changed_test_files_own_class() {
        let graph = build_graph();
        let idx = graph.index_of("Core.Tests/Core.Tests.csproj").unwrap();
        let affected = HashSet::from([idx]);
        // No coverage map at all: without the heuristic this would be
        // RunAll (no basis to narrow). With it, a changed test file
        // narrows straight to its own class, coverage notwithstanding.
        let d = derive_with_heuristic(
            &graph,
            idx,
            &["Core.Tests/FooTests.cs".to_string()],
            &affected,
            None,
            None,
            Some(Heuristic::TestFileOnly),
        );
        match d.filter {
            TestFilter::RunSubset { tests, .. } => {
                assert!(tests.contains("FooTests"));
                assert_eq!(tests.len(), 1);
            }
            other => panic!("expected RunSubset, got {other:?}"),
        }
    }

    #[test]
    fn test_file_only_heuristic_falls_through_when_no_changed_file_is_a_test() {
        let graph = build_graph();
        let idx = graph.index_of("Core.Tests/Core.Tests.csproj").unwrap();
        let affected = HashSet::from([idx]);
        let d = derive_with_heuristic(
            &graph,
            idx,
            &["Core/Foo.cs".to_string()],
            &affected,
            None,
            None,
            Some(Heuristic::TestFileOnly),
        );
        assert_eq!(d.filter, TestFilter::RunAll { user_filter: None });
    }

    #[test]
    fn heuristic_from_name_rejects_unknown_names() {
        assert_eq!(Heuristic::from_name("TestFileOnly"), Some(Heuristic::TestFileOnly));
        assert_eq!(Heuristic::from_name("Bogus"), None);
    }

    #[test]
    fn detects_contradiction_between_user_filter_and_coverage() {
        let mut tests = HashSet::new();
        tests.insert("Core.Tests/Core.Tests.csproj".to_string());
        let filter = TestFilter::RunSubset {
            tests,
            user_filter: Some("Unrelated.Name".to_string()),
        };
        assert!(user_filter_contradicts(
            &filter,
            &["Unrelated.Name".to_string()]
        ));
    }
}
