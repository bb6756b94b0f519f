//! donotnet CLI
//!
//! This module provides the CLI argument model and command implementations,
//! kept separate from the binary entry point so the argument parsing and
//! command logic stay unit-testable without a process boundary.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command as OsCommand;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum, ValueHint};
use clap_complete::{generate, Shell};
use colored::Colorize;

use donotnet_core::config::{ancestor_dirs, load_explicit, load_layers, ColorMode as CoreColorMode, PartialConfig};
use donotnet_core::{
    args_fingerprint, content_fingerprint, coverage, discover, test_filter, Cache, Config, Fingerprint, Graph,
    Project,
};
use donotnet_exec::engine::{cache_key_for, decide_skip_flags};
use donotnet_exec::{process, CancellationToken, Engine, EngineConfig, ProcessSpec, RunContext, Unit, UnitResult, Verb};
use donotnet_watch::{debounce, overrides, replay, watcher};

// ============================================================================
// Argument model
// ============================================================================

/// donotnet - incremental build and test orchestrator for multi-project
/// .NET repositories.
#[derive(Parser, Debug, Clone)]
#[command(name = "donotnet")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Run as if invoked from this directory instead of the process cwd.
    #[arg(short = 'C', long = "dir", value_name = "DIR", value_hint = ValueHint::DirPath, global = true)]
    pub dir: Option<PathBuf>,

    /// Explicit configuration file; a parse failure here is fatal.
    #[arg(long, value_hint = ValueHint::FilePath, global = true)]
    pub config: Option<PathBuf>,

    /// Emit debug-level logs.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress all but error-level logs.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Disable the live progress/status line.
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Disable "did you mean" suggestions for unrecognized input.
    #[arg(long, global = true)]
    pub no_suggestions: bool,

    /// Worker count; defaults to CPU count when unset or zero.
    #[arg(long, global = true)]
    pub parallel: Option<usize>,

    /// Run every target to completion instead of cancelling on first failure.
    #[arg(long, global = true)]
    pub keep_going: bool,

    /// Ignore cache hits; rerun every target.
    #[arg(long, global = true)]
    pub force: bool,

    /// After the initial run, keep watching for changes.
    #[arg(long, global = true)]
    pub watch: bool,

    /// Root directory for persisted state, overriding `.donotnet/`.
    #[arg(long, value_hint = ValueHint::DirPath, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Colorize output.
    #[arg(long, value_enum, default_value = "auto", global = true)]
    pub color: CliColorMode,

    /// Print each project's captured output inline as it completes.
    #[arg(long, global = true)]
    pub print_output: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run tests, narrowing to the affected subset where possible.
    Test(TestArgs),
    /// Build projects.
    Build(BuildArgs),
    /// Inspect discovery, graph, coverage, or heuristic state.
    List(ListArgs),
    /// Print the dependency-ordered execution plan without running anything.
    Plan(PlanArgs),
    /// Inspect or maintain the persistent result cache.
    Cache(CacheArgs),
    /// Print the fully resolved, layered configuration.
    Config(ConfigArgs),
    /// Build or rebuild the per-test coverage map.
    Coverage(CoverageArgs),
    /// Generate shell completion scripts.
    Completion(CompletionArgs),
    /// Print version information.
    Version(VersionArgs),
}

/// Flags shared by `test` and `build` for narrowing the target set to
/// VCS-reported changes.
#[derive(Parser, Debug, Clone, Default)]
pub struct VcsArgs {
    /// Narrow the target set to `Affected(changed)` using VCS-dirty files.
    #[arg(long)]
    pub vcs_changed: bool,

    /// Compare against this ref instead of the working tree (implies `--vcs-changed`).
    #[arg(long, value_name = "REF")]
    pub vcs_ref: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct TestArgs {
    #[command(flatten)]
    pub vcs: VcsArgs,

    /// Build (or rebuild) the coverage map from this run's results.
    #[arg(long)]
    pub coverage: bool,

    /// Name of a configured heuristic to apply (spec glossary "Heuristic").
    #[arg(long, value_name = "NAME")]
    pub heuristics: Option<String>,

    /// Replay only the tests that failed on the previous run.
    #[arg(long)]
    pub failed: bool,

    /// How staleness is determined for skip-eligible projects.
    #[arg(long, value_enum, default_value = "mtime")]
    pub staleness_check: StalenessCheck,

    /// Granularity recorded into the coverage map.
    #[arg(long, value_enum, default_value = "class")]
    pub coverage_granularity: CoverageGranularity,

    /// Skip writing `.trx`/log report files.
    #[arg(long)]
    pub no_reports: bool,

    /// A user-supplied driver filter expression, AND-combined with any
    /// derived filter.
    #[arg(long)]
    pub filter: Option<String>,

    /// Forwarded verbatim to `dotnet test` after a literal `--`.
    #[arg(last = true)]
    pub extra: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub vcs: VcsArgs,

    /// Rebuild every project regardless of cache or skip-eligibility.
    #[arg(long)]
    pub full_build: bool,

    /// Never use the solution-level fast path; always invoke per-project.
    #[arg(long)]
    pub no_solution: bool,

    /// Use the solution-level fast path even when only some members changed.
    #[arg(long)]
    pub force_solution: bool,

    /// Forwarded verbatim to `dotnet build` after a literal `--`.
    #[arg(last = true)]
    pub extra: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    #[command(subcommand)]
    pub selector: ListSelector,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ListSelector {
    /// Projects affected by the current VCS-dirty set.
    Affected(VcsArgs),
    /// Every discovered test project.
    Tests,
    /// Coverage-map summary per test project.
    Coverage,
    /// Known heuristics and the rule each applies.
    Heuristics,
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub vcs: VcsArgs,

    /// Plan a `test` invocation instead of a `build` invocation.
    #[arg(long)]
    pub test: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub selector: CacheSelector,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheSelector {
    /// Print entry count, age range, and on-disk size.
    Stats,
    /// Evict entries older than the configured (or given) TTL.
    Clean(CacheCleanArgs),
}

#[derive(Parser, Debug, Clone, Default)]
pub struct CacheCleanArgs {
    /// Override the configured cache TTL, in days.
    #[arg(long)]
    pub ttl_days: Option<u64>,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Print as JSON instead of TOML.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct CoverageArgs {
    #[command(subcommand)]
    pub selector: CoverageSelector,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CoverageSelector {
    /// Run every test project under coverage collection and persist the map.
    Build,
}

#[derive(Parser, Debug, Clone)]
pub struct CompletionArgs {
    #[arg(value_enum)]
    pub shell: CliShell,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct VersionArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CliColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

impl From<CliColorMode> for CoreColorMode {
    fn from(mode: CliColorMode) -> Self {
        match mode {
            CliColorMode::Auto => CoreColorMode::Auto,
            CliColorMode::Always => CoreColorMode::Always,
            CliColorMode::Never => CoreColorMode::Never,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StalenessCheck {
    Git,
    #[default]
    Mtime,
    Both,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CoverageGranularity {
    Method,
    #[default]
    Class,
    File,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl From<CliShell> for Shell {
    fn from(shell: CliShell) -> Self {
        match shell {
            CliShell::Bash => Shell::Bash,
            CliShell::Zsh => Shell::Zsh,
            CliShell::Fish => Shell::Fish,
            CliShell::PowerShell => Shell::PowerShell,
            CliShell::Elvish => Shell::Elvish,
        }
    }
}

// ============================================================================
// "Did you mean" suggestions: an unknown flag prints a
// suggestion based on edit distance
// ============================================================================

/// The closest candidate to `input`, if any is close enough to be worth
/// surfacing. Below this similarity threshold a suggestion is more
/// confusing than helpful, so `None` is returned instead.
pub fn suggest<'a>(input: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    const THRESHOLD: f64 = 0.7;
    candidates
        .into_iter()
        .map(|c| (c, strsim::jaro_winkler(input, c)))
        .filter(|(_, score)| *score > THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(c, _)| c)
}

/// Parse `Args`, and on an unrecognized subcommand/flag, print clap's own
/// error plus a "did you mean" line derived from edit distance against the
/// known top-level verbs. `--no-suggestions` on the raw argv
/// disables the extra line, matching what a real invocation would have
/// passed had parsing succeeded.
pub fn parse_args(raw: impl IntoIterator<Item = String>) -> clap::error::Result<Args> {
    let argv: Vec<String> = raw.into_iter().collect();
    match Args::try_parse_from(&argv) {
        Ok(args) => Ok(args),
        Err(err) => {
            if !argv.iter().any(|a| a == "--no-suggestions") {
                if let Some(bad) = unrecognized_token(&err) {
                    const VERBS: &[&str] = &[
                        "test", "build", "list", "plan", "cache", "config", "coverage", "completion", "version",
                    ];
                    if let Some(candidate) = suggest(&bad, VERBS.iter().copied()) {
                        eprintln!("{}", format!("note: unrecognized `{bad}` — did you mean `{candidate}`?").yellow());
                    }
                }
            }
            Err(err)
        }
    }
}

fn unrecognized_token(err: &clap::Error) -> Option<String> {
    err.context()
        .find(|(kind, _)| *kind == clap::error::ContextKind::InvalidSubcommand || *kind == clap::error::ContextKind::InvalidArg)
        .map(|(_, value)| value.to_string())
}

// ============================================================================
// Repository-root resolution and minimal VCS plumbing. The VCS interface
// is specified only at its boundary, so this shells out to `git` for
// exactly two things and implements nothing else of a VCS.
// ============================================================================

const VCS_MARKERS: &[&str] = &[".git", ".hg", ".svn"];

/// Walk upwards from `start` until a VCS marker directory is found;
/// returns `start` itself if none is found anywhere above it.
pub fn resolve_repo_root(start: &Path) -> PathBuf {
    let mut current = start;
    loop {
        if VCS_MARKERS.iter().any(|m| current.join(m).exists()) {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return start.to_path_buf(),
        }
    }
}

/// Files reported by git as uncommitted-modified (staged, unstaged, and
/// untracked), relative to `repo_root`. Empty on any git failure — not a
/// git repository, or git not on `PATH` — rather than an error: VCS
/// integration narrows the target set, it never gates being able to run
/// at all.
pub fn dirty_files(repo_root: &Path) -> Vec<String> {
    run_git(repo_root, &["status", "--porcelain", "--no-renames"])
        .map(|out| out.lines().filter_map(|line| line.get(3..)).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Files changed relative to `vcs_ref` (spec's `--vcs-ref`).
pub fn changed_since(repo_root: &Path, vcs_ref: &str) -> Vec<String> {
    run_git(repo_root, &["diff", "--name-only", vcs_ref])
        .map(|out| out.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

fn run_git(repo_root: &Path, args: &[&str]) -> Option<String> {
    let output = OsCommand::new("git").arg("-C").arg(repo_root).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

/// Map repo-root-relative changed file paths to the projects that own
/// them, by longest directory-prefix match (the same rule the watch loop
/// uses for filesystem events).
pub fn changed_projects(repo_root: &Path, graph: &Graph, changed_files: &[String]) -> HashSet<usize> {
    let project_dirs: Vec<(PathBuf, usize)> = graph
        .projects
        .iter()
        .enumerate()
        .map(|(idx, p)| (p.directory.clone(), idx))
        .collect();

    changed_files
        .iter()
        .filter_map(|f| watcher::owning_project(&repo_root.join(f), &project_dirs))
        .collect()
}

// ============================================================================
// Configuration resolution
// ============================================================================

/// Build the CLI-flags layer (highest precedence).
pub fn cli_overrides(args: &Args) -> PartialConfig {
    PartialConfig {
        parallelism: args.parallel.filter(|&p| p > 0),
        cache_dir: args.cache_dir.clone(),
        log_level: if args.verbose {
            Some("debug".to_string())
        } else if args.quiet {
            Some("error".to_string())
        } else {
            None
        },
        watch_debounce_ms: None,
        cache_ttl_days: None,
        solution_grouping: None,
        color: Some(args.color.into()),
    }
}

/// Run the full layer chain and resolve the final [`Config`].
pub fn resolve_config(args: &Args, repo_root: &Path, cwd: &Path) -> anyhow::Result<Config> {
    let user_config_dir = dirs::config_dir().map(|d| d.join("donotnet"));
    let ancestors = ancestor_dirs(cwd, repo_root);
    let explicit = match &args.config {
        Some(path) => Some(load_explicit(path)?),
        None => None,
    };

    let merged = load_layers(
        user_config_dir.as_deref(),
        &ancestors,
        repo_root,
        cwd,
        std::env::vars(),
        explicit,
        cli_overrides(args),
    );

    Ok(merged.resolve())
}

/// `NO_COLOR`/`TERM=dumb` always win over an `auto` resolution.
pub fn apply_color_mode(mode: CoreColorMode) {
    let forced_off = std::env::var_os("NO_COLOR").is_some() || std::env::var("TERM").map(|t| t == "dumb").unwrap_or(false);
    let enabled = match mode {
        CoreColorMode::Always => true,
        CoreColorMode::Never => false,
        CoreColorMode::Auto => !forced_off && std::io::IsTerminal::is_terminal(&std::io::stdout()),
    };
    colored::control::set_override(enabled && !forced_off);
}

pub fn cache_dir_path(repo_root: &Path, config: &Config) -> PathBuf {
    if config.cache_dir.is_absolute() {
        config.cache_dir.clone()
    } else {
        repo_root.join(&config.cache_dir)
    }
}

// ============================================================================
// Discovery, graph, and fingerprinting glue
// ============================================================================

pub struct Workspace {
    pub repo_root: PathBuf,
    pub graph: Graph,
}

pub fn load_workspace(repo_root: &Path) -> anyhow::Result<Workspace> {
    let discovery = discover(repo_root, repo_root)?;
    let graph = Graph::build(repo_root, discovery.projects);
    Ok(Workspace {
        repo_root: repo_root.to_path_buf(),
        graph,
    })
}

/// Content fingerprint for `idx` over its own directory plus every
/// transitive forward dependency's directory (spec glossary "Content
/// fingerprint").
fn project_fingerprint(repo_root: &Path, graph: &Graph, idx: usize) -> anyhow::Result<Fingerprint> {
    let closure = graph.forward_closure(&[idx]);
    let mut dirs: Vec<PathBuf> = closure.into_iter().map(|i| graph.project(i).directory.clone()).collect();
    dirs.sort();
    dirs.dedup();
    Ok(content_fingerprint(repo_root, &dirs)?)
}

fn all_fingerprints(repo_root: &Path, graph: &Graph) -> anyhow::Result<std::collections::HashMap<usize, Fingerprint>> {
    (0..graph.projects.len())
        .map(|idx| Ok((idx, project_fingerprint(repo_root, graph, idx)?)))
        .collect()
}

/// Resolve the initial change set for `--vcs-changed`/`--vcs-ref`, mapped
/// to owning projects.
fn resolve_vcs_changed(repo_root: &Path, graph: &Graph, vcs: &VcsArgs) -> HashSet<usize> {
    let files = match &vcs.vcs_ref {
        Some(reference) => changed_since(repo_root, reference),
        None => dirty_files(repo_root),
    };
    changed_projects(repo_root, graph, &files)
}

// ============================================================================
// `test` / `build` shared unit construction
// ============================================================================

fn engine_config(args: &Args) -> EngineConfig {
    EngineConfig {
        dotnet_binary: "dotnet".to_string(),
        parallelism: args.parallel.filter(|&p| p > 0).unwrap_or_else(num_cpus::get),
        max_attempts: 1,
        fail_fast: !args.keep_going,
        force: args.force,
        show_progress: !args.no_progress,
    }
}

fn build_units(
    workspace: &Workspace,
    targets: &HashSet<usize>,
    verb: Verb,
    args_fp: Fingerprint,
    fingerprints: &std::collections::HashMap<usize, Fingerprint>,
) -> Vec<Unit> {
    targets
        .iter()
        .map(|&idx| {
            let project = workspace.graph.project(idx);
            let content_fp = fingerprints[&idx];
            let key = cache_key_for(content_fp, args_fp, &project.id_str());
            let unit_verb = if project.is_test { verb } else { Verb::Build };
            let mut unit = Unit::new(idx, unit_verb, key);
            unit.is_build_only = unit_verb == Verb::Build;
            unit
        })
        .collect()
}

fn apply_skip_flags(workspace: &Workspace, unit: &mut Unit, dirty_projects: &HashSet<usize>, mode: donotnet_exec::StalenessMode) {
    let project = workspace.graph.project(unit.project_idx);
    let manifest_path = workspace.repo_root.join(&project.id);
    let dirty = dirty_projects.contains(&unit.project_idx);
    let (no_build, no_restore) = decide_skip_flags(&project.directory, &manifest_path, dirty, mode);
    unit.no_build = no_build;
    unit.no_restore = no_restore;
}

impl From<StalenessCheck> for donotnet_exec::StalenessMode {
    fn from(check: StalenessCheck) -> Self {
        match check {
            StalenessCheck::Git => donotnet_exec::StalenessMode::Git,
            StalenessCheck::Mtime => donotnet_exec::StalenessMode::Mtime,
            StalenessCheck::Both => donotnet_exec::StalenessMode::Both,
        }
    }
}

impl From<CoverageGranularity> for donotnet_core::Granularity {
    fn from(g: CoverageGranularity) -> Self {
        match g {
            CoverageGranularity::Method => donotnet_core::Granularity::Method,
            CoverageGranularity::Class => donotnet_core::Granularity::Class,
            CoverageGranularity::File => donotnet_core::Granularity::File,
        }
    }
}

/// Apply test-filter derivation to every `Test`-verb unit (build-only
/// units never get a filter). Returns the set of
/// project indices a derivation resolved to `SkipAll`; the caller drops
/// those units from the run entirely rather than dispatching a no-op.
/// Resolve `--heuristics NAME` to a known heuristic, warning (not failing)
/// on a name that `donotnet list heuristics` doesn't recognize.
fn resolve_heuristic(name: Option<&str>) -> Option<donotnet_core::Heuristic> {
    let name = name?;
    match donotnet_core::Heuristic::from_name(name) {
        Some(h) => Some(h),
        None => {
            tracing::warn!("unknown heuristic '{name}'; ignoring (see `donotnet list heuristics`)");
            None
        }
    }
}

fn apply_test_filters(
    workspace: &Workspace,
    units: &mut [Unit],
    changed_files: &[String],
    affected: &HashSet<usize>,
    coverage_map: Option<&donotnet_core::CoverageMap>,
    user_filter: Option<&str>,
    heuristic: Option<donotnet_core::Heuristic>,
) -> HashSet<usize> {
    let mut skipped = HashSet::new();
    for unit in units.iter_mut() {
        if unit.verb != Verb::Test {
            continue;
        }
        let derivation = test_filter::derive_with_heuristic(
            &workspace.graph,
            unit.project_idx,
            changed_files,
            affected,
            coverage_map,
            user_filter,
            heuristic,
        );
        match derivation.filter {
            test_filter::TestFilter::RunAll { user_filter } => {
                unit.user_filter = user_filter;
            }
            test_filter::TestFilter::RunSubset { tests, user_filter } => {
                let derived_expr = test_filter::to_driver_expression(&tests);
                if let Some(uf) = &user_filter {
                    let project = workspace.graph.project(unit.project_idx);
                    if test_filter::category_contradiction(uf, &derived_expr) {
                        tracing::warn!(
                            "{}: --filter '{uf}' contradicts the derived category filter; both are applied as requested",
                            project.id_str()
                        );
                    }
                    let named = test_filter::extract_named_tests(uf);
                    if test_filter::user_filter_contradicts(
                        &test_filter::TestFilter::RunSubset {
                            tests: tests.clone(),
                            user_filter: None,
                        },
                        &named,
                    ) {
                        tracing::warn!(
                            "{}: --filter '{uf}' names tests outside the coverage-derived subset; both are applied as requested",
                            project.id_str()
                        );
                    }
                }
                unit.derived_filter = Some(derived_expr);
                unit.user_filter = user_filter;
            }
            test_filter::TestFilter::SkipAll => {
                skipped.insert(unit.project_idx);
            }
        }
    }
    skipped
}

fn open_cache(repo_root: &Path, config: &Config) -> anyhow::Result<Cache> {
    let dir = cache_dir_path(repo_root, config);
    Ok(Cache::open(dir.join("cache.db"))?)
}

#[cfg(unix)]
fn install_signal_handler(token: CancellationToken) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    if let Ok(mut signals) = Signals::new([SIGINT, SIGTERM]) {
        std::thread::spawn(move || {
            if signals.forever().next().is_some() {
                token.cancel();
            }
        });
    }
}

#[cfg(not(unix))]
fn install_signal_handler(_token: CancellationToken) {}

fn report_results(results: &[UnitResult], workspace: &Workspace, print_output: bool) -> bool {
    let mut any_failed = false;
    for result in results {
        let project = workspace.graph.project(result.project_idx);
        if result.success {
            let cached = if result.from_cache { " (cached)" } else { "" };
            println!("{} {}{}", "ok".green(), project.name, cached);
        } else {
            any_failed = true;
            println!("{} {}", "FAIL".red().bold(), project.name);
            if print_output {
                println!("{}", String::from_utf8_lossy(&result.output));
            } else {
                println!("--- Failure Output ({}) ---", project.name);
                println!("{}", String::from_utf8_lossy(&result.output));
            }
        }
    }
    !any_failed
}

// ============================================================================
// Command implementations
// ============================================================================

pub fn run_test_command(args: &Args, test_args: &TestArgs, workspace: &Workspace, config: &Config) -> anyhow::Result<bool> {
    let fingerprints = all_fingerprints(&workspace.repo_root, &workspace.graph)?;
    let args_fp = args_fingerprint("test", &test_args.extra);

    if test_args.failed {
        return run_failed_replay(args, test_args, workspace, config, &fingerprints, args_fp);
    }

    let test_projects: HashSet<usize> = workspace
        .graph
        .projects
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_test)
        .map(|(idx, _)| idx)
        .collect();

    let vcs_requested = test_args.vcs.vcs_changed || test_args.vcs.vcs_ref.is_some();
    let changed_files: Vec<String> = if vcs_requested {
        match &test_args.vcs.vcs_ref {
            Some(reference) => changed_since(&workspace.repo_root, reference),
            None => dirty_files(&workspace.repo_root),
        }
    } else {
        Vec::new()
    };

    let base_targets: HashSet<usize> = if vcs_requested {
        let changed_project_set = changed_projects(&workspace.repo_root, &workspace.graph, &changed_files);
        workspace.graph.affected(&changed_project_set.iter().copied().collect::<Vec<_>>())
    } else {
        test_projects.clone()
    };
    let closure = workspace.graph.forward_closure(&base_targets.iter().copied().collect::<Vec<_>>());

    let staleness_mode: donotnet_exec::StalenessMode = test_args.staleness_check.into();
    let dirty_projects: HashSet<usize> = if staleness_mode == donotnet_exec::StalenessMode::Mtime {
        HashSet::new()
    } else {
        let files = if vcs_requested { changed_files.clone() } else { dirty_files(&workspace.repo_root) };
        changed_projects(&workspace.repo_root, &workspace.graph, &files)
    };

    let mut units = build_units(workspace, &closure, Verb::Test, args_fp, &fingerprints);
    for unit in units.iter_mut() {
        apply_skip_flags(workspace, unit, &dirty_projects, staleness_mode);
        unit.extra_args = test_args.extra.clone();
    }

    let coverage_path = coverage::default_path(&cache_dir_path(&workspace.repo_root, config));
    let coverage_map = if coverage::exists(&coverage_path) {
        Some(coverage::load(&coverage_path))
    } else {
        None
    };
    if let Some(map) = &coverage_map {
        if coverage::is_stale(&workspace.repo_root, map) {
            tracing::warn!("coverage map is stale (covered files changed since it was generated); consider `donotnet coverage build`");
        }
    }

    let heuristic = resolve_heuristic(test_args.heuristics.as_deref());

    // Filter derivation only narrows when the run is itself scoped to a
    // change set (`--vcs-changed`/`--vcs-ref`) — an unscoped `test`
    // invocation means "run everything", and deriving a subset from an
    // empty changed-file list would wrongly skip every covered project.
    if vcs_requested && !args.force {
        let skipped = apply_test_filters(
            workspace,
            &mut units,
            &changed_files,
            &base_targets,
            coverage_map.as_ref(),
            test_args.filter.as_deref(),
            heuristic,
        );
        units.retain(|u| u.verb != Verb::Test || !skipped.contains(&u.project_idx));
    } else if let Some(filter) = &test_args.filter {
        for unit in units.iter_mut() {
            if unit.verb == Verb::Test {
                unit.user_filter = Some(filter.clone());
            }
        }
    }

    let cache = open_cache(&workspace.repo_root, config)?;
    let token = CancellationToken::new();
    install_signal_handler(token.clone());
    let engine = Engine::new(&workspace.graph, Some(&cache), engine_config(args));
    let ctx = RunContext {
        content_fingerprints: fingerprints,
        args_fingerprint: args_fp,
    };
    let results = engine.run(units, &ctx, &token);

    // Spec §8 scenario 1: an unscoped, unforced `test` invocation with
    // nothing to do (every target already satisfied from the cache, or no
    // targets at all) reports "No affected projects" rather than a line
    // per project.
    if !args.force && results.iter().all(|r| r.from_cache) {
        println!("No affected projects");
        return Ok(true);
    }

    Ok(report_results(&results, workspace, args.print_output))
}

/// `--failed`: replay exactly the test projects whose most recent run
/// under this args fingerprint failed, filtered to just the test names
/// `donotnet_watch::replay` parsed out of that run's captured output
/// from the previous failed run.
fn run_failed_replay(
    args: &Args,
    test_args: &TestArgs,
    workspace: &Workspace,
    config: &Config,
    fingerprints: &std::collections::HashMap<usize, Fingerprint>,
    args_fp: Fingerprint,
) -> anyhow::Result<bool> {
    let cache = open_cache(&workspace.repo_root, config)?;
    let failed = cache.failed_entries(&args_fp.to_hex());
    let staleness_mode: donotnet_exec::StalenessMode = test_args.staleness_check.into();
    let dirty_projects: HashSet<usize> = if staleness_mode == donotnet_exec::StalenessMode::Mtime {
        HashSet::new()
    } else {
        changed_projects(&workspace.repo_root, &workspace.graph, &dirty_files(&workspace.repo_root))
    };

    let mut units = Vec::new();
    for entry in &failed {
        let Some(idx) = workspace.graph.index_of(&entry.project_id) else {
            continue;
        };
        let content_fp = fingerprints[&idx];
        let key = cache_key_for(content_fp, args_fp, &entry.project_id);
        let mut unit = Unit::new(idx, Verb::Test, key);
        apply_skip_flags(workspace, &mut unit, &dirty_projects, staleness_mode);
        unit.extra_args = test_args.extra.clone();
        let failed_tests = replay::parse_failed_tests(&String::from_utf8_lossy(&entry.output));
        unit.derived_filter = replay::replay_filter(&failed_tests);
        unit.user_filter = test_args.filter.clone();
        units.push(unit);
    }

    if units.is_empty() {
        println!("no previously failed tests to replay");
        return Ok(true);
    }

    let token = CancellationToken::new();
    install_signal_handler(token.clone());
    let engine = Engine::new(&workspace.graph, Some(&cache), engine_config(args));
    let ctx = RunContext {
        content_fingerprints: fingerprints.clone(),
        args_fingerprint: args_fp,
    };
    let results = engine.run(units, &ctx, &token);
    Ok(report_results(&results, workspace, args.print_output))
}

pub fn run_build_command(args: &Args, build_args: &BuildArgs, workspace: &Workspace, config: &Config) -> anyhow::Result<bool> {
    let fingerprints = all_fingerprints(&workspace.repo_root, &workspace.graph)?;

    let targets: HashSet<usize> = if build_args.full_build {
        (0..workspace.graph.projects.len()).collect()
    } else if build_args.vcs.vcs_changed || build_args.vcs.vcs_ref.is_some() {
        let changed = resolve_vcs_changed(&workspace.repo_root, &workspace.graph, &build_args.vcs);
        workspace.graph.affected(&changed.iter().copied().collect::<Vec<_>>())
    } else {
        (0..workspace.graph.projects.len()).collect()
    };

    let args_fp = args_fingerprint("build", &build_args.extra);
    let cache = open_cache(&workspace.repo_root, config)?;
    let token = CancellationToken::new();
    install_signal_handler(token.clone());
    let engine_cfg = engine_config(args);

    let mut solution_results = Vec::new();
    let mut solution_covered: HashSet<usize> = HashSet::new();
    if !build_args.no_solution {
        let discovery = discover(&workspace.repo_root, &workspace.repo_root)?;
        let grouping = if build_args.force_solution {
            donotnet_core::graph::best_fit(&discovery.solutions, &workspace.graph, &workspace.repo_root, &targets)
        } else {
            donotnet_core::graph::strict_match(&discovery.solutions, &workspace.graph, &workspace.repo_root, &targets)
        };
        let (solution_indices, _) = donotnet_exec::engine::solution_fast_path(&grouping);
        let (results, covered) = run_solution_targets(
            workspace,
            &discovery,
            solution_indices,
            &cache,
            &fingerprints,
            args_fp,
            build_args,
            &engine_cfg,
            &token,
        );
        solution_results = results;
        solution_covered = covered;
        if engine_cfg.fail_fast && solution_results.iter().any(|r| !r.success) {
            let ok = report_results(&solution_results, workspace, args.print_output);
            return Ok(ok);
        }
    }

    let remaining_targets: HashSet<usize> = targets.difference(&solution_covered).copied().collect();
    let mut units = build_units(workspace, &remaining_targets, Verb::Build, args_fp, &fingerprints);
    let no_dirty_projects = HashSet::new();
    for unit in units.iter_mut() {
        apply_skip_flags(workspace, unit, &no_dirty_projects, donotnet_exec::StalenessMode::Mtime);
        unit.extra_args = build_args.extra.clone();
    }

    let engine = Engine::new(&workspace.graph, Some(&cache), engine_cfg);
    let ctx = RunContext {
        content_fingerprints: fingerprints,
        args_fingerprint: args_fp,
    };
    let mut results = engine.run(units, &ctx, &token);
    results.splice(0..0, solution_results);
    Ok(report_results(&results, workspace, args.print_output))
}

/// Run the driver once per solution claimed by the solution fast path,
/// attributing the result to every member project (spec §5 "Solution-level
/// fast path"). Returns the fabricated per-project results plus the set of
/// project indices they cover, so the caller can exclude them from the
/// ordinary per-project dispatch.
#[allow(clippy::too_many_arguments)]
fn run_solution_targets(
    workspace: &Workspace,
    discovery: &donotnet_core::Discovery,
    solution_indices: &[usize],
    cache: &Cache,
    fingerprints: &std::collections::HashMap<usize, Fingerprint>,
    args_fp: Fingerprint,
    build_args: &BuildArgs,
    engine_cfg: &EngineConfig,
    token: &CancellationToken,
) -> (Vec<UnitResult>, HashSet<usize>) {
    let mut results = Vec::new();
    let mut covered = HashSet::new();

    for &sol_idx in solution_indices {
        let Some(solution) = discovery.solutions.get(sol_idx) else { continue };
        let member_indices: Vec<usize> = solution
            .members
            .iter()
            .filter_map(|abs| {
                let rel = abs.strip_prefix(&workspace.repo_root).unwrap_or(abs);
                workspace.graph.index_of(&donotnet_core::project::to_forward_slash(rel))
            })
            .collect();
        if member_indices.is_empty() {
            continue;
        }

        let solution_path = workspace.repo_root.join(&solution.id);
        let mut proc_args = vec!["build".to_string(), solution_path.to_string_lossy().into_owned()];
        proc_args.extend(build_args.extra.iter().cloned());
        let spec = ProcessSpec::new(engine_cfg.dotnet_binary.clone(), proc_args, &workspace.repo_root, solution.name.clone());

        let show_progress = engine_cfg.show_progress;
        let label = solution.name.clone();
        let outcome = process::run(&spec, token, |line| {
            if show_progress {
                println!("[{label}] {line}");
            }
        });
        let (success, output) = match outcome {
            Ok(o) => (o.success, o.output),
            Err(err) => (false, err.to_string().into_bytes()),
        };

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        for &idx in &member_indices {
            let project = workspace.graph.project(idx);
            let content_fp = fingerprints[&idx];
            let key = cache_key_for(content_fp, args_fp, &project.id_str());
            cache.mark(&key, now, success, output.clone(), String::new());
            results.push(UnitResult {
                project_idx: idx,
                cache_key: key,
                success,
                from_cache: false,
                output: output.clone(),
                skipped_by_filter: false,
                filter_used: None,
            });
            covered.insert(idx);
        }

        if !success && engine_cfg.fail_fast {
            break;
        }
    }

    (results, covered)
}

pub fn run_list_command(list_args: &ListArgs, workspace: &Workspace) -> anyhow::Result<()> {
    match &list_args.selector {
        ListSelector::Affected(vcs) => {
            let changed = resolve_vcs_changed(&workspace.repo_root, &workspace.graph, vcs);
            let affected = workspace.graph.affected(&changed.iter().copied().collect::<Vec<_>>());
            for idx in affected {
                println!("{}", workspace.graph.project(idx).id_str());
            }
        }
        ListSelector::Tests => {
            let untested = workspace.graph.untested_projects();
            for (idx, project) in workspace.graph.projects.iter().enumerate() {
                if project.is_test {
                    println!("{}", project.id_str());
                } else if untested.contains(&idx) {
                    println!("{} {}", project.id_str(), "(untested)".yellow());
                }
            }
        }
        ListSelector::Coverage => {
            println!("no coverage map; run `donotnet coverage build` first");
        }
        ListSelector::Heuristics => {
            println!("TestFileOnly: if the changed file is itself a test file, run only its class-tests");
        }
    }
    Ok(())
}

pub fn run_plan_command(args: &Args, plan_args: &PlanArgs, workspace: &Workspace) -> anyhow::Result<()> {
    let targets: HashSet<usize> = if plan_args.vcs.vcs_changed || plan_args.vcs.vcs_ref.is_some() {
        let changed = resolve_vcs_changed(&workspace.repo_root, &workspace.graph, &plan_args.vcs);
        workspace.graph.affected(&changed.iter().copied().collect::<Vec<_>>())
    } else if plan_args.test {
        workspace
            .graph
            .projects
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_test)
            .map(|(idx, _)| idx)
            .collect()
    } else {
        (0..workspace.graph.projects.len()).collect()
    };
    let closure = workspace.graph.forward_closure(&targets.iter().copied().collect::<Vec<_>>());
    let verb = if plan_args.test { "test" } else { "build" };
    println!("plan ({verb}, {} project(s)):", closure.len());
    for idx in &closure {
        let project = workspace.graph.project(*idx);
        let deps = workspace.graph.forward_edges(*idx).len();
        println!("  {} (depends on {deps})", project.id_str());
    }
    let _ = args;
    Ok(())
}

pub fn run_cache_command(cache_args: &CacheArgs, workspace: &Workspace, config: &Config) -> anyhow::Result<()> {
    let cache = open_cache(&workspace.repo_root, config)?;
    match &cache_args.selector {
        CacheSelector::Stats => {
            let stats = cache.stats();
            let fmt_ts = |ts: Option<u64>| ts.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
            println!("entries:    {}", stats.total);
            println!("oldest:     {}", fmt_ts(stats.oldest));
            println!("newest:     {}", fmt_ts(stats.newest));
            println!("disk bytes: {}", stats.disk_bytes);
        }
        CacheSelector::Clean(clean_args) => {
            let ttl_days = clean_args.ttl_days.unwrap_or(config.cache_ttl_days);
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let evicted = cache.delete_older_than(now, ttl_days * 86_400);
            println!("evicted {evicted} entr{}", if evicted == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}

pub fn run_config_command(config_args: &ConfigArgs, config: &Config) -> anyhow::Result<()> {
    if config_args.json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

pub fn run_coverage_build_command(workspace: &Workspace, config: &Config) -> anyhow::Result<()> {
    let test_indices: Vec<usize> = workspace
        .graph
        .projects
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_test)
        .map(|(idx, _)| idx)
        .collect();

    let reports_dir = cache_dir_path(&workspace.repo_root, config).join("reports");
    let build_config = donotnet_watch::CoverageBuildConfig {
        dotnet_binary: "dotnet".to_string(),
        reports_dir,
        ..Default::default()
    };

    struct NullParser;
    impl donotnet_watch::CoverageXmlParser for NullParser {
        fn parse(&self, _report_path: &Path) -> donotnet_watch::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let map = donotnet_watch::builder::build_coverage_map(&workspace.graph, &test_indices, &build_config, &NullParser, now);

    let path = coverage::default_path(&cache_dir_path(&workspace.repo_root, config));
    coverage::save(&path, &map)?;
    println!("coverage map written to {} ({}/{} projects processed)", path.display(), map.processed, map.total);
    Ok(())
}

pub fn run_completion_command(args: &CompletionArgs) {
    let mut cmd = Args::command();
    let shell: Shell = args.shell.into();
    generate(shell, &mut cmd, "donotnet", &mut std::io::stdout());
}

pub struct VersionInfo {
    pub version: &'static str,
}

impl VersionInfo {
    pub fn current() -> Self {
        VersionInfo {
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "donotnet {}", self.version)
    }
}

pub fn run_version_command(version_args: &VersionArgs) {
    let info = VersionInfo::current();
    if version_args.json {
        println!(r#"{{"version":"{}"}}"#, info.version);
    } else {
        print!("{info}");
    }
}

// ============================================================================
// Watch loop
// ============================================================================

const WATCH_HELP: &str = "\
r  force-rerun last targets
a  run-all (clears filters)
f  run previously failed
p  filter by project name
t  filter by test-name substring
c  filter by trait (Category=X)
h  show this help
q  quit";

pub fn run_watch_loop(args: &Args, workspace: &Workspace, config: &Config, run_test: bool) -> anyhow::Result<()> {
    use notify::{RecommendedWatcher, RecursiveMode, Watcher};
    use std::sync::mpsc::channel;

    let (tx, rx) = channel::<notify::Result<notify::Event>>();
    let mut fs_watcher: RecommendedWatcher = Watcher::new(
        move |res| {
            let _ = tx.send(res);
        },
        notify::Config::default(),
    )?;
    watcher::register_tree(&mut fs_watcher, &workspace.repo_root)?;
    let _ = RecursiveMode::NonRecursive;

    let project_dirs: Vec<(PathBuf, usize)> = workspace
        .graph
        .projects
        .iter()
        .enumerate()
        .map(|(idx, p)| (p.directory.clone(), idx))
        .collect();

    let mut state = debounce::DebounceState::new();
    let mut override_stack = overrides::OverrideStack::new();
    let keyboard_active = overrides::should_read_keyboard();
    let (key_tx, key_rx) = channel::<overrides::OverrideAction>();
    if keyboard_active {
        donotnet_watch::keyboard::spawn(key_tx);
        println!(
            "watching {} director{} — press 'h' for help, 'q' to quit",
            project_dirs.len(),
            if project_dirs.len() == 1 { "y" } else { "ies" }
        );
    } else {
        println!("watching {} directories (non-interactive: stdin is not a terminal)", project_dirs.len());
    }

    let coverage_path = coverage::default_path(&cache_dir_path(&workspace.repo_root, config));
    let cache = open_cache(&workspace.repo_root, config)?;
    let verb = if run_test { Verb::Test } else { Verb::Build };
    let args_fp = args_fingerprint(if run_test { "test" } else { "build" }, &[]);
    let mut last_targets: HashSet<usize> = HashSet::new();

    loop {
        while let Ok(action) = key_rx.try_recv() {
            match action {
                overrides::OverrideAction::Quit => return Ok(()),
                overrides::OverrideAction::Help => println!("{WATCH_HELP}"),
                overrides::OverrideAction::ForceRerunLast => {
                    if last_targets.is_empty() {
                        println!("nothing to rerun yet");
                    } else {
                        execute_watch_targets(workspace, config, &cache, &last_targets, verb, args_fp, &override_stack, args, true);
                    }
                }
                overrides::OverrideAction::RunPreviouslyFailed => {
                    let failed = cache.failed_entries(&args_fp.to_hex());
                    let targets: HashSet<usize> = failed.iter().filter_map(|e| workspace.graph.index_of(&e.project_id)).collect();
                    if targets.is_empty() {
                        println!("no previously failed targets to replay");
                    } else {
                        execute_watch_targets(workspace, config, &cache, &targets, verb, args_fp, &override_stack, args, true);
                        last_targets = targets;
                    }
                }
                other => override_stack.apply(other),
            }
        }

        match rx.recv_timeout(std::time::Duration::from_millis(50)) {
            Ok(Ok(event)) => {
                for path in watcher::classify_event(&event) {
                    if let Some(idx) = watcher::owning_project(&path, &project_dirs) {
                        let rel = path
                            .strip_prefix(&workspace.repo_root)
                            .unwrap_or(&path)
                            .to_string_lossy()
                            .into_owned();
                        state.record(idx, rel);
                    }
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "watcher failure, continuing");
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if state.is_due() {
            let (pending_projects, pending_files) = state.take();
            if pending_projects.is_empty() {
                continue;
            }
            let coverage_map = if coverage::exists(&coverage_path) {
                let map = coverage::load(&coverage_path);
                if coverage::is_stale(&workspace.repo_root, &map) {
                    tracing::warn!("coverage map is stale; targets derived from it may be wider or narrower than actual coverage");
                }
                Some(map)
            } else {
                None
            };
            let trigger = debounce::resolve_targets(&workspace.graph, &pending_projects, &pending_files, coverage_map.as_ref(), run_test);
            let mut targets = match trigger {
                debounce::Trigger::CoverageDerived(set) | debounce::Trigger::AffectedClosure(set) => set,
            };

            if let Some(name_substr) = &override_stack.project_filter {
                targets.retain(|&idx| workspace.graph.project(idx).name.contains(name_substr.as_str()));
            }

            if targets.is_empty() {
                continue;
            }

            execute_watch_targets(workspace, config, &cache, &targets, verb, args_fp, &override_stack, args, false);
            last_targets = targets;
        }
    }
    Ok(())
}

/// Run the engine over `targets` from within the watch loop, applying the
/// accumulated interactive overrides as a user-level test
/// filter. `force` bypasses the cache short-circuit for a `--failed`/
/// rerun-last trigger, so the cache does not short-circuit a replay.
#[allow(clippy::too_many_arguments)]
fn execute_watch_targets(
    workspace: &Workspace,
    config: &Config,
    cache: &Cache,
    targets: &HashSet<usize>,
    verb: Verb,
    args_fp: Fingerprint,
    override_stack: &overrides::OverrideStack,
    args: &Args,
    force: bool,
) {
    let fingerprints = match all_fingerprints(&workspace.repo_root, &workspace.graph) {
        Ok(f) => f,
        Err(err) => {
            tracing::warn!(error = %err, "failed to recompute fingerprints, skipping this run");
            return;
        }
    };

    let mut units = build_units(workspace, targets, verb, args_fp, &fingerprints);
    let user_filter = combined_override_filter(override_stack);
    let no_dirty_projects = HashSet::new();
    for unit in units.iter_mut() {
        apply_skip_flags(workspace, unit, &no_dirty_projects, donotnet_exec::StalenessMode::Mtime);
        if let Some(filter) = &user_filter {
            unit.user_filter = Some(filter.clone());
        }
    }

    let mut cfg = engine_config(args);
    cfg.force = cfg.force || force;
    let token = CancellationToken::new();
    install_signal_handler(token.clone());
    let engine = Engine::new(&workspace.graph, Some(cache), cfg);
    let ctx = RunContext {
        content_fingerprints: fingerprints,
        args_fingerprint: args_fp,
    };
    println!("change detected, running {} project(s)", units.len());
    let results = engine.run(units, &ctx, &token);
    report_results(&results, workspace, args.print_output);
}

/// Compose the watch loop's test-name-substring and trait filters into a
/// single AND-joined expression from the user's active override stack.
fn combined_override_filter(override_stack: &overrides::OverrideStack) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(substr) = &override_stack.test_name_filter {
        parts.push(format!("(FullyQualifiedName~{substr})"));
    }
    if let Some(traits) = override_stack.trait_filter_expression() {
        parts.push(format!("({traits})"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" & "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_test_verb_with_global_flags() {
        let args = Args::try_parse_from(["donotnet", "--verbose", "test"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Test(_)));
    }

    #[test]
    fn forwards_trailing_args_after_double_dash() {
        let args = Args::try_parse_from(["donotnet", "test", "--", "--logger", "trx"]).unwrap();
        match args.command {
            Command::Test(t) => assert_eq!(t.extra, vec!["--logger".to_string(), "trx".to_string()]),
            _ => panic!("expected Test"),
        }
    }

    #[test]
    fn list_requires_a_selector_subcommand() {
        let result = Args::try_parse_from(["donotnet", "list", "tests"]);
        assert!(result.is_ok());
    }

    #[test]
    fn suggest_finds_close_misspelling() {
        assert_eq!(suggest("tets", ["test", "build", "plan"]), Some("test"));
    }

    #[test]
    fn suggest_returns_none_for_unrelated_input() {
        assert_eq!(suggest("xyz123", ["test", "build", "plan"]), None);
    }

    #[test]
    fn resolves_repo_root_by_walking_up_to_git_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("src/Core");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(resolve_repo_root(&nested), dir.path());
    }

    #[test]
    fn falls_back_to_start_when_no_vcs_marker_exists() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(resolve_repo_root(&nested), nested);
    }

    #[test]
    fn color_mode_respects_no_color_env() {
        std::env::set_var("NO_COLOR", "1");
        apply_color_mode(CoreColorMode::Always);
        assert!(!colored::control::SHOULD_COLORIZE.should_colorize());
        std::env::remove_var("NO_COLOR");
    }
}
