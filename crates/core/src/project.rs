//! The project/solution data model.

use std::path::{Path, PathBuf};

/// An independently-buildable unit, identified by its manifest path relative
/// to the repository root. That relative path is the stable identifier used
/// in cache keys and in the dependency graph — see [`Project::id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Path to the manifest (e.g. `src/Core/Core.csproj`), relative to the
    /// repository root. Used verbatim as the project identifier.
    pub id: PathBuf,

    /// Human-readable name, derived from the manifest file stem.
    pub name: String,

    /// Absolute path to the directory containing the manifest.
    pub directory: PathBuf,

    /// Absolute paths of every outbound project reference this manifest
    /// declares, after normalization (forward slashes, `.`/`..` cleaned).
    pub references: Vec<PathBuf>,

    /// Outbound third-party package names declared by the manifest.
    pub packages: Vec<String>,

    /// True iff this project is classified as a test project (name-suffix
    /// heuristic OR an explicit manifest property).
    pub is_test: bool,
}

impl Project {
    /// The stable identifier used in graphs and cache keys: the manifest
    /// path relative to the repository root, with forward slashes.
    pub fn id_str(&self) -> String {
        to_forward_slash(&self.id)
    }

    /// Classification rule: a project is a test project iff
    /// its name ends in `.Tests`, `.Test`, or `Tests`, or the manifest
    /// declared a test-project property (folded in by the caller before
    /// constructing this `Project`).
    pub fn name_suggests_test(name: &str) -> bool {
        name.ends_with(".Tests") || name.ends_with(".Test") || name.ends_with("Tests")
    }
}

/// A named grouping of projects, identified by a solution manifest file.
/// Used purely as an invocation optimization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    /// Path to the solution manifest, relative to the repository root.
    pub id: PathBuf,

    /// Display name, derived from the manifest file stem.
    pub name: String,

    /// Absolute paths of every project this solution lists as a member.
    pub members: Vec<PathBuf>,
}

/// Normalize a path to a `/`-separated string, regardless of platform.
pub fn to_forward_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_classification() {
        assert!(Project::name_suggests_test("Core.Tests"));
        assert!(Project::name_suggests_test("Core.Test"));
        assert!(Project::name_suggests_test("CoreTests"));
        assert!(!Project::name_suggests_test("Core"));
        assert!(!Project::name_suggests_test("TestsHelper"));
    }

    #[test]
    fn test_id_str_normalizes_separators() {
        let p = Project {
            id: PathBuf::from("src/Core/Core.csproj"),
            name: "Core".into(),
            directory: PathBuf::from("/repo/src/Core"),
            references: vec![],
            packages: vec![],
            is_test: false,
        };
        assert_eq!(p.id_str(), "src/Core/Core.csproj");
    }
}
