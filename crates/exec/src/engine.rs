//! The execution engine: dependency-ordered parallel dispatch, cache
//! lookup/writeback, retry rules, and the solution fast path.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use donotnet_core::cache::make_key;
use donotnet_core::{Cache, Fingerprint, Graph, SolutionGrouping};

use crate::cancellation::CancellationToken;
use crate::pool::WorkerPool;
use crate::process::{self, ProcessSpec};

/// Substrings in captured output that indicate the driver needs a restore
/// it was told to skip.
const NEEDS_RESTORE_PATTERNS: &[&str] = &[
    "NETSDK1004",
    "has not been restored",
    "run dotnet restore",
];

/// Substrings indicating the test filter expression itself was rejected,
/// distinct from "filter matched zero tests".
const FILTER_FORMAT_ERROR_PATTERNS: &[&str] = &["incorrect filter format", "Invalid filter"];

/// Substrings indicating the filter was well-formed but matched nothing —
/// the same recovery applies (retry with only the user filter), but this
/// is a distinct condition from a malformed expression.
const NO_TESTS_MATCH_PATTERNS: &[&str] = &["No test matches the given testcase filter", "No test is available"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Build,
    Test,
}

impl Verb {
    fn dotnet_subcommand(self) -> &'static str {
        match self {
            Verb::Build => "build",
            Verb::Test => "test",
        }
    }
}

/// Per-unit execution plan: which project, which verb, and the
/// already-resolved cache key for this (content, args, project) triple.
#[derive(Debug, Clone)]
pub struct Unit {
    pub project_idx: usize,
    pub verb: Verb,
    pub cache_key: String,
    /// Args forwarded verbatim to the driver after `--`, plus anything the
    /// caller has already decided (e.g. `--no-restore`, `--collect`).
    pub extra_args: Vec<String>,
    /// The derived test-filter expression, if any. Tracked
    /// separately from `extra_args` so a filter-rejection retry can drop
    /// just this piece instead of the whole argument list.
    pub derived_filter: Option<String>,
    /// The user's own `--filter`, kept across a derived-filter retry.
    pub user_filter: Option<String>,
    pub no_build: bool,
    pub no_restore: bool,
    pub is_build_only: bool,
}

impl Unit {
    pub fn new(project_idx: usize, verb: Verb, cache_key: impl Into<String>) -> Self {
        Unit {
            project_idx,
            verb,
            cache_key: cache_key.into(),
            extra_args: Vec::new(),
            derived_filter: None,
            user_filter: None,
            no_build: false,
            no_restore: false,
            is_build_only: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitResult {
    pub project_idx: usize,
    pub cache_key: String,
    pub success: bool,
    pub from_cache: bool,
    pub output: Vec<u8>,
    pub skipped_by_filter: bool,
    pub filter_used: Option<String>,
}

pub struct EngineConfig {
    pub dotnet_binary: String,
    pub parallelism: usize,
    pub max_attempts: u32,
    /// `!keep_going` in CLI terms: the first failure cancels the run.
    pub fail_fast: bool,
    pub force: bool,
    /// Emit each driver output line as it streams in (spec's live
    /// "progress/status line"). `--no-progress` turns this off; the
    /// buffered output is still captured and returned either way.
    pub show_progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            dotnet_binary: "dotnet".to_string(),
            parallelism: num_cpus::get(),
            max_attempts: 1,
            fail_fast: false,
            force: false,
            show_progress: true,
        }
    }
}

/// Per-run context the engine needs to perform cache writeback beyond the
/// units actually executed: every project's current content fingerprint
/// (so a dependency outside the target set can still be marked known-good)
/// and the single args fingerprint shared by the whole invocation.
pub struct RunContext {
    pub content_fingerprints: HashMap<usize, Fingerprint>,
    pub args_fingerprint: Fingerprint,
}

pub struct Engine<'a> {
    graph: &'a Graph,
    cache: Option<&'a Cache>,
    config: EngineConfig,
}

enum JobMessage {
    Done(UnitResult),
}

impl<'a> Engine<'a> {
    pub fn new(graph: &'a Graph, cache: Option<&'a Cache>, config: EngineConfig) -> Self {
        Engine { graph, cache, config }
    }

    /// Run every unit in `units`, respecting forward-dependency order
    /// within the unit set (a unit's dependencies, restricted to the set
    /// being run, must finish first — anything outside the set is assumed
    /// already satisfied). Returns one [`UnitResult`] per unit, in
    /// completion order. Successful results are written back to the cache
    /// immediately, including transitive forward dependencies.
    pub fn run(&self, units: Vec<Unit>, ctx: &RunContext, token: &CancellationToken) -> Vec<UnitResult> {
        let units_by_project: HashMap<usize, usize> = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.project_idx, i))
            .collect();
        let target_projects: HashSet<usize> = units.iter().map(|u| u.project_idx).collect();

        let mut pending_deps: Vec<usize> = units
            .iter()
            .map(|u| {
                self.graph
                    .forward_edges(u.project_idx)
                    .iter()
                    .filter(|dep| target_projects.contains(dep))
                    .count()
            })
            .collect();

        let mut ready: Vec<usize> = pending_deps
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == 0)
            .map(|(idx, _)| idx)
            .collect();

        let pool: WorkerPool<JobMessage> = WorkerPool::new(self.config.parallelism);
        let mut in_flight = 0usize;
        let mut dispatched: HashSet<usize> = HashSet::new();
        let mut results = Vec::with_capacity(units.len());
        let mut failed = false;

        // `units` is consumed into per-index slots so dispatch can move
        // each unit exactly once; indices line up with `pending_deps`.
        let mut units: Vec<Option<Unit>> = units.into_iter().map(Some).collect();

        loop {
            if !failed || !self.config.fail_fast {
                while let Some(idx) = ready.pop() {
                    if dispatched.contains(&idx) {
                        continue;
                    }
                    dispatched.insert(idx);
                    if token.is_cancelled() || (failed && self.config.fail_fast) {
                        continue;
                    }
                    let unit = units[idx].take().expect("unit dispatched at most once");
                    self.dispatch(unit, &pool, token);
                    in_flight += 1;
                }
            }

            if in_flight == 0 {
                break;
            }

            let JobMessage::Done(result) = pool.recv();
            in_flight -= 1;
            if !result.success {
                failed = true;
                if self.config.fail_fast {
                    token.cancel();
                }
            }

            if let Some(cache) = self.cache {
                self.write_back(cache, &result, ctx, now_unix());
            }

            let finished_project = result.project_idx;
            results.push(result);

            for &dependent_project in self.graph.reverse_edges(finished_project) {
                if !target_projects.contains(&dependent_project) {
                    continue;
                }
                let Some(&dependent_idx) = units_by_project.get(&dependent_project) else {
                    continue;
                };
                pending_deps[dependent_idx] = pending_deps[dependent_idx].saturating_sub(1);
                if pending_deps[dependent_idx] == 0 {
                    ready.push(dependent_idx);
                }
            }
        }

        results
    }

    /// Mark `result`'s own cache key, and — on success only — every
    /// transitive forward dependency's key as successful with empty
    /// output: if this project's fingerprint covered its whole dependency
    /// subtree, those dependencies are transitively known-good under the
    /// same args fingerprint.
    fn write_back(&self, cache: &Cache, result: &UnitResult, ctx: &RunContext, now: u64) {
        if result.from_cache {
            return;
        }
        cache.mark(&result.cache_key, now, result.success, result.output.clone(), String::new());

        if !result.success {
            return;
        }

        for dep_idx in self.graph.forward_closure(&[result.project_idx]) {
            if dep_idx == result.project_idx {
                continue;
            }
            let Some(dep_fp) = ctx.content_fingerprints.get(&dep_idx) else {
                continue;
            };
            let dep_id = self.graph.project(dep_idx).id_str();
            let dep_key = make_key(&dep_fp.to_hex(), &ctx.args_fingerprint.to_hex(), &dep_id);
            cache.mark(&dep_key, now, true, Vec::new(), String::new());
        }
    }

    fn dispatch(&self, unit: Unit, pool: &WorkerPool<JobMessage>, token: &CancellationToken) {
        if !self.config.force {
            if let Some(cache) = self.cache {
                if let Some(entry) = cache.lookup(&unit.cache_key) {
                    let result = UnitResult {
                        project_idx: unit.project_idx,
                        cache_key: unit.cache_key,
                        success: true,
                        from_cache: true,
                        output: entry.output,
                        skipped_by_filter: false,
                        filter_used: None,
                    };
                    pool.submit(move || JobMessage::Done(result));
                    return;
                }
            }
        }

        let project = self.graph.project(unit.project_idx);
        let project_dir = project.directory.clone();
        let project_name = project.name.clone();
        let dotnet_binary = self.config.dotnet_binary.clone();
        let max_attempts = self.config.max_attempts;
        let show_progress = self.config.show_progress;
        let token = token.clone();

        pool.submit(move || {
            JobMessage::Done(run_unit(
                &unit,
                &project_dir,
                &project_name,
                &dotnet_binary,
                max_attempts,
                show_progress,
                &token,
            ))
        })
    }
}

/// The full per-project execution path: compose the
/// command line, run it, and apply the two documented retry rules. Runs
/// entirely inside one worker thread; the collector only observes the
/// final [`UnitResult`].
fn run_unit(
    unit: &Unit,
    project_dir: &Path,
    project_name: &str,
    dotnet_binary: &str,
    max_attempts: u32,
    show_progress: bool,
    token: &CancellationToken,
) -> UnitResult {
    let filter_used = build_filter(unit.user_filter.as_deref(), unit.derived_filter.as_deref());
    let emit_line = |line: &str| {
        if show_progress {
            tracing::info!("{line}");
        }
    };

    let mut args = build_args(unit, filter_used.as_deref());
    let spec = ProcessSpec::new(dotnet_binary, args.clone(), project_dir, project_name).with_retries(max_attempts);

    let outcome = process::run(&spec, token, emit_line);
    let (mut success, mut output) = match outcome {
        Ok(o) => (o.success, o.output),
        Err(_) => (false, Vec::new()),
    };

    // Retry rule 1: failed, restore was skipped, and the
    // captured output looks like a missing-restore error. Retry once
    // without `--no-restore`.
    if !success && unit.no_restore && contains_any(&output, NEEDS_RESTORE_PATTERNS) {
        args = build_args(&Unit { no_restore: false, ..unit.clone() }, filter_used.as_deref());
        let retry_spec = ProcessSpec::new(dotnet_binary, args.clone(), project_dir, project_name);
        if let Ok(o) = process::run(&retry_spec, token, emit_line) {
            success = o.success;
            output = o.output;
        }
    }

    // Retry rule 2: failed with a filter-rejection error
    // and a derived filter was in play. Retry once with only the user
    // filter preserved, no further retries.
    let mut final_filter_used = filter_used.clone();
    if !success
        && unit.derived_filter.is_some()
        && (contains_any(&output, FILTER_FORMAT_ERROR_PATTERNS) || contains_any(&output, NO_TESTS_MATCH_PATTERNS))
    {
        let user_only = unit.user_filter.clone();
        let retry_args = build_args(
            &Unit {
                derived_filter: None,
                user_filter: user_only.clone(),
                ..unit.clone()
            },
            user_only.as_deref(),
        );
        let retry_spec = ProcessSpec::new(dotnet_binary, retry_args, project_dir, project_name);
        if let Ok(o) = process::run(&retry_spec, token, emit_line) {
            success = o.success;
            output = o.output;
            final_filter_used = user_only;
        }
    }

    UnitResult {
        project_idx: unit.project_idx,
        cache_key: unit.cache_key.clone(),
        success,
        from_cache: false,
        output,
        skipped_by_filter: false,
        filter_used: final_filter_used,
    }
}

fn contains_any(output: &[u8], patterns: &[&str]) -> bool {
    let text = String::from_utf8_lossy(output);
    patterns.iter().any(|p| text.contains(p))
}

/// AND-combine the user's own filter with the derived one.
fn build_filter(user_filter: Option<&str>, derived_filter: Option<&str>) -> Option<String> {
    donotnet_core::test_filter::combine_filters(user_filter, derived_filter)
}

fn build_args(unit: &Unit, filter: Option<&str>) -> Vec<String> {
    let mut args = vec![unit.verb.dotnet_subcommand().to_string()];
    if unit.no_build {
        args.push("--no-build".to_string());
    }
    if unit.no_restore {
        args.push("--no-restore".to_string());
    }
    if let (Verb::Test, Some(f)) = (unit.verb, filter) {
        args.push("--filter".to_string());
        args.push(f.to_string());
    }
    args.extend(unit.extra_args.iter().cloned());
    args
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// How skip-eligibility (`--no-build`/`--no-restore`) decides whether a
/// project is "unchanged" (spec's `--staleness-check {git|mtime|both}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessMode {
    /// A project with VCS-dirty files is never skip-eligible, regardless
    /// of mtimes (handles clock skew / checkouts that don't touch mtimes).
    Git,
    /// The mtime-only comparison against build/restore markers (default).
    Mtime,
    /// Skip-eligible only when both checks agree.
    Both,
}

/// Decide `--no-build`/`--no-restore` skip eligibility:
/// safe to skip a build when every source file under `project_dir` is
/// older than the most recent build artifact, and safe to skip restore
/// when the manifest is older than the restore marker (`project.assets.json`
/// under `obj/`). Best-effort: any I/O failure resolving an mtime is
/// treated as "not safe to skip" rather than propagated, since this is
/// purely a performance optimization.
///
/// `dirty` is whether the project's directory contains VCS-reported
/// uncommitted changes (spec glossary "Dirty files"); it only narrows the
/// mtime-based decision under [`StalenessMode::Git`]/[`StalenessMode::Both`] —
/// `StalenessMode::Mtime` ignores it entirely.
pub fn decide_skip_flags(project_dir: &Path, manifest_path: &Path, dirty: bool, mode: StalenessMode) -> (bool, bool) {
    let newest_source = newest_mtime_under(project_dir, &["cs", "fs", "vb"]);
    let build_artifact = newest_mtime_matching(&project_dir.join("bin"), "dll");
    let mtime_no_build = match (newest_source, build_artifact) {
        (Some(src), Some(artifact)) => src <= artifact,
        _ => false,
    };

    let manifest_mtime = std::fs::metadata(manifest_path).and_then(|m| m.modified()).ok();
    let restore_marker = project_dir.join("obj").join("project.assets.json");
    let restore_mtime = std::fs::metadata(&restore_marker).and_then(|m| m.modified()).ok();
    let mtime_no_restore = match (manifest_mtime, restore_mtime) {
        (Some(m), Some(r)) => m <= r,
        _ => false,
    };

    // Under `Git`, a project with no VCS-dirty files is skip-eligible as
    // long as a prior build/restore actually happened (existence of the
    // marker), without relying on mtime ordering at all.
    let git_no_build = !dirty && build_artifact.is_some();
    let git_no_restore = !dirty && restore_mtime.is_some();

    let (no_build, no_restore) = match mode {
        StalenessMode::Mtime => (mtime_no_build, mtime_no_restore),
        StalenessMode::Git => (git_no_build, git_no_restore),
        StalenessMode::Both => (mtime_no_build && git_no_build, mtime_no_restore && git_no_restore),
    };

    (no_build, no_restore)
}

fn newest_mtime_under(dir: &Path, extensions: &[&str]) -> Option<std::time::SystemTime> {
    let mut newest = None;
    let walker = ignore::WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(false)
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .map(|n| !donotnet_core::discovery::SKIPPED_DIR_NAMES.contains(&n))
                .unwrap_or(true)
        })
        .build();
    for entry in walker.flatten() {
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("");
        if !extensions.contains(&ext) {
            continue;
        }
        if let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) {
            newest = Some(newest.map_or(mtime, |n: std::time::SystemTime| n.max(mtime)));
        }
    }
    newest
}

fn newest_mtime_matching(dir: &Path, extension: &str) -> Option<std::time::SystemTime> {
    newest_mtime_under(dir, &[extension])
}

/// Construct the cache key for a (project, verb) pair given its content
/// fingerprint and the shared args fingerprint for this invocation.
pub fn cache_key_for(content: Fingerprint, args: Fingerprint, project_id: &str) -> String {
    make_key(&content.to_hex(), &args.to_hex(), project_id)
}

/// Apply solution grouping on top of a target set: returns which targets
/// can be satisfied by running whole solutions instead of per-project
/// invocations.
pub fn solution_fast_path(grouping: &SolutionGrouping) -> (&[usize], &[usize]) {
    (&grouping.solutions, &grouping.unassigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use donotnet_core::project::Project;
    use std::path::PathBuf;

    fn project(id: &str) -> Project {
        Project {
            id: PathBuf::from(id),
            name: id.to_string(),
            directory: PathBuf::from("/tmp"),
            references: vec![],
            packages: vec![],
            is_test: false,
        }
    }

    fn empty_ctx() -> RunContext {
        RunContext {
            content_fingerprints: HashMap::new(),
            args_fingerprint: Fingerprint([0u8; 32]),
        }
    }

    #[test]
    fn independent_units_all_run_without_ordering_constraint() {
        let root = PathBuf::from("/repo");
        let graph = Graph::build(&root, vec![project("A/A.csproj"), project("B/B.csproj")]);
        let engine = Engine::new(
            &graph,
            None,
            EngineConfig {
                dotnet_binary: "true".to_string(),
                parallelism: 2,
                max_attempts: 1,
                fail_fast: false,
                force: true,
                show_progress: false,
            },
        );
        let units = vec![
            Unit::new(graph.index_of("A/A.csproj").unwrap(), Verb::Build, "key-a"),
            Unit::new(graph.index_of("B/B.csproj").unwrap(), Verb::Build, "key-b"),
        ];
        let token = CancellationToken::new();
        let results = engine.run(units, &empty_ctx(), &token);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn dependency_runs_before_dependent() {
        let root = PathBuf::from("/repo");
        let mut dependent = project("A/A.csproj");
        dependent.references.push(PathBuf::from("/repo/B/B.csproj"));
        let graph = Graph::build(&root, vec![dependent, project("B/B.csproj")]);
        let engine = Engine::new(
            &graph,
            None,
            EngineConfig {
                dotnet_binary: "true".to_string(),
                parallelism: 1,
                max_attempts: 1,
                fail_fast: false,
                force: true,
                show_progress: false,
            },
        );
        let a = graph.index_of("A/A.csproj").unwrap();
        let b = graph.index_of("B/B.csproj").unwrap();
        let units = vec![Unit::new(a, Verb::Build, "key-a"), Unit::new(b, Verb::Build, "key-b")];
        let token = CancellationToken::new();
        let results = engine.run(units, &empty_ctx(), &token);
        let b_pos = results.iter().position(|r| r.project_idx == b).unwrap();
        let a_pos = results.iter().position(|r| r.project_idx == a).unwrap();
        assert!(b_pos < a_pos, "B must complete before A starts/finishes");
    }

    #[test]
    fn cache_hit_short_circuits_without_running_the_driver() {
        use donotnet_core::Cache;
        use tempfile::tempdir;

        let root = PathBuf::from("/repo");
        let graph = Graph::build(&root, vec![project("A/A.csproj")]);
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        cache.mark("key-a", 1, true, b"cached output".to_vec(), String::new());

        let engine = Engine::new(
            &graph,
            Some(&cache),
            EngineConfig {
                dotnet_binary: "false".to_string(), // would fail if actually run
                parallelism: 1,
                max_attempts: 1,
                fail_fast: false,
                force: false,
                show_progress: false,
            },
        );
        let a = graph.index_of("A/A.csproj").unwrap();
        let units = vec![Unit::new(a, Verb::Build, "key-a")];
        let token = CancellationToken::new();
        let results = engine.run(units, &empty_ctx(), &token);
        assert!(results[0].from_cache);
        assert!(results[0].success);
        assert_eq!(results[0].output, b"cached output");
    }

    #[test]
    fn skip_flags_are_false_when_no_artifacts_exist_yet() {
        use tempfile::tempdir;
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("A.csproj"), "<Project></Project>").unwrap();
        let (no_build, no_restore) = decide_skip_flags(dir.path(), &dir.path().join("A.csproj"), false, StalenessMode::Mtime);
        assert!(!no_build);
        assert!(!no_restore);
    }

    #[test]
    fn git_staleness_mode_ignores_mtime_when_clean() {
        use tempfile::tempdir;
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("A.csproj"), "<Project></Project>").unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/A.dll"), b"0").unwrap();
        let (no_build, _) = decide_skip_flags(dir.path(), &dir.path().join("A.csproj"), false, StalenessMode::Git);
        assert!(no_build, "clean project with a build artifact is skip-eligible under Git mode");
    }

    #[test]
    fn git_staleness_mode_blocks_skip_when_dirty() {
        use tempfile::tempdir;
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("A.csproj"), "<Project></Project>").unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/A.dll"), b"0").unwrap();
        let (no_build, _) = decide_skip_flags(dir.path(), &dir.path().join("A.csproj"), true, StalenessMode::Git);
        assert!(!no_build, "a dirty project is never skip-eligible under Git mode");
    }

    #[test]
    fn build_args_combines_filter_and_flags() {
        let mut unit = Unit::new(0, Verb::Test, "k");
        unit.no_build = true;
        unit.user_filter = Some("Category=Fast".to_string());
        let filter = build_filter(unit.user_filter.as_deref(), None);
        let args = build_args(&unit, filter.as_deref());
        assert!(args.contains(&"--no-build".to_string()));
        assert!(args.contains(&"--filter".to_string()));
        assert!(args.contains(&"Category=Fast".to_string()));
    }
}
