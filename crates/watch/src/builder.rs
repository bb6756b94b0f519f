//! Offline per-test coverage-map builder.
//!
//! Runs each test project with coverage collection enabled and asks an
//! injected [`CoverageXmlParser`] to turn the resulting report into the
//! file list it touched. The concrete report format (Cobertura XML,
//! `dotnet-coverage` JSON, etc.) is left as an external collaborator
//! specified only at its interface, so this module owns the trait
//! boundary and the driving loop, not a parser implementation.

use std::path::{Path, PathBuf};

use donotnet_core::project::Project;
use donotnet_core::{CoverageMap, Granularity, Graph};
use donotnet_exec::{process, CancellationToken, ProcessSpec};

use crate::error::Result;

/// Parses one test project's coverage report into the set of source files
/// it touched.
pub trait CoverageXmlParser {
    fn parse(&self, report_path: &Path) -> Result<Vec<String>>;
}

pub struct CoverageBuildConfig {
    pub dotnet_binary: String,
    pub reports_dir: PathBuf,
    pub coverage_arg: String,
    pub granularity: Granularity,
}

impl Default for CoverageBuildConfig {
    fn default() -> Self {
        CoverageBuildConfig {
            dotnet_binary: "dotnet".to_string(),
            reports_dir: PathBuf::from(".donotnet/reports"),
            coverage_arg: "--collect:XPlat Code Coverage".to_string(),
            granularity: Granularity::default(),
        }
    }
}

fn report_path_for(config: &CoverageBuildConfig, project: &Project) -> PathBuf {
    config
        .reports_dir
        .join(format!("{}.coverage", project.id_str().replace('/', "_")))
}

/// Run every test project in `test_project_indices` under coverage
/// collection, sequentially — coverage collection is I/O-heavy per run,
/// not the hot path the parallel engine optimizes — and fold the results
/// into a fresh [`CoverageMap`]. A per-project run or parse failure is
/// logged and skipped rather than aborting the whole build: a partial
/// coverage map is still useful, which is exactly why [`CoverageMap`]
/// tracks `processed` separately from `total`.
pub fn build_coverage_map(
    graph: &Graph,
    test_project_indices: &[usize],
    config: &CoverageBuildConfig,
    parser: &dyn CoverageXmlParser,
    now: u64,
) -> CoverageMap {
    let mut map = CoverageMap::new(now);
    map.total = test_project_indices.len();
    map.granularity = config.granularity;

    let token = CancellationToken::new();
    for &idx in test_project_indices {
        let project = graph.project(idx);
        let report_path = report_path_for(config, project);

        let spec = ProcessSpec::new(
            config.dotnet_binary.clone(),
            vec!["test".to_string(), config.coverage_arg.clone()],
            &project.directory,
            project.name.clone(),
        );

        if process::run(&spec, &token, |_line| {}).is_err() {
            tracing::warn!(project = %project.name, "coverage build run failed, skipping");
            continue;
        }

        match parser.parse(&report_path) {
            Ok(files) => map.record(&project.id_str(), files),
            Err(err) => {
                tracing::warn!(project = %project.name, error = %err, "failed to parse coverage report, skipping");
            }
        }
    }

    map
}
