//! The per-test coverage map.
//!
//! Built offline (by `donotnet-watch`'s coverage pass) from a test run's
//! code-coverage output and persisted here as a plain bidirectional index:
//! which source files each test project's run touched, and the reverse
//! index used to derive watch targets from a changed file when no better
//! dependency information is available.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// How finely a coverage run records which declaring unit a covered file
/// maps to (`--coverage-granularity`). The builder's external XML/report
/// parser is the thing that actually honors this; it's carried on the map
/// so a later `donotnet list coverage` can show what produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    Method,
    Class,
    File,
}

impl Default for Granularity {
    fn default() -> Self {
        Granularity::Class
    }
}

/// A single project's file-to-test coverage, plus the reverse index and
/// bookkeeping counters used to report build progress.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoverageMap {
    /// source file (repo-root-relative, forward-slash) -> test projects
    /// whose last run exercised it.
    pub file_to_tests: HashMap<String, HashSet<String>>,
    /// test project -> source files it exercises. The inverse of
    /// `file_to_tests`, kept redundantly so either direction is O(1).
    pub test_to_files: HashMap<String, HashSet<String>>,
    /// Unix seconds when this map was last (re)generated.
    pub generated_at: u64,
    /// Total number of test projects the generating run was asked to cover.
    pub total: usize,
    /// Number of test projects actually processed before the run ended
    /// (may be less than `total` if the generating run was interrupted).
    pub processed: usize,
    /// Granularity the generating run was asked to collect at.
    #[serde(default)]
    pub granularity: Granularity,
}

impl CoverageMap {
    pub fn new(generated_at: u64) -> Self {
        CoverageMap {
            generated_at,
            ..Default::default()
        }
    }

    /// Record that `test_project` exercised `files` during its last run,
    /// replacing any previous coverage for that test project.
    pub fn record(&mut self, test_project: &str, files: impl IntoIterator<Item = String>) {
        let old_files = self.test_to_files.remove(test_project).unwrap_or_default();
        for file in &old_files {
            if let Some(tests) = self.file_to_tests.get_mut(file) {
                tests.remove(test_project);
                if tests.is_empty() {
                    self.file_to_tests.remove(file);
                }
            }
        }

        let new_files: HashSet<String> = files.into_iter().collect();
        for file in &new_files {
            self.file_to_tests
                .entry(file.clone())
                .or_default()
                .insert(test_project.to_string());
        }
        self.test_to_files.insert(test_project.to_string(), new_files);
        self.processed += 1;
    }

    /// Every test project known to exercise `changed_file`.
    pub fn tests_for_file(&self, changed_file: &str) -> HashSet<String> {
        self.file_to_tests
            .get(changed_file)
            .cloned()
            .unwrap_or_default()
    }

    /// Union of tests across every changed file.
    pub fn tests_for_changed(&self, changed_files: &[String]) -> HashSet<String> {
        let mut out = HashSet::new();
        for file in changed_files {
            out.extend(self.tests_for_file(file));
        }
        out
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.processed >= self.total
    }
}

/// Persist as JSON (the same format/crate choice as configuration, for
/// consistency rather than necessity — spec places no format requirement
/// on this file).
pub fn save(path: &Path, map: &CoverageMap) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(CoreError::Io)?;
    }
    let json = serde_json::to_string_pretty(map).map_err(|e| CoreError::ConfigParseFailure {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    std::fs::write(path, json).map_err(CoreError::Io)?;
    Ok(())
}

/// Load a coverage map, tolerating a truncated or corrupt file by returning
/// an empty map rather than failing the caller's whole invocation — a
/// missing coverage map only means "watch everything", not an
/// unrecoverable error.
pub fn load(path: &Path) -> CoverageMap {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return CoverageMap::default(),
    };
    serde_json::from_str(&content).unwrap_or_default()
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// True iff any file the map claims coverage for has been modified more
/// recently than the map was generated — a cheap, best-effort staleness
/// signal surfaced as a warning (spec §3 "staleness reported as a
/// warning"), not something that invalidates the map outright: a stale
/// map still narrows the target set, just less precisely.
pub fn is_stale(repo_root: &Path, map: &CoverageMap) -> bool {
    map.file_to_tests.keys().any(|file| {
        std::fs::metadata(repo_root.join(file))
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| mtime.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() > map.generated_at)
            .unwrap_or(false)
    })
}

#[allow(dead_code)]
fn to_forward_slash_rel(repo_root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(repo_root).unwrap_or(path);
    crate::project::to_forward_slash(rel)
}

pub fn default_path(donotnet_dir: &Path) -> PathBuf {
    donotnet_dir.join("coverage.json")
}
