//! Project & solution discovery.
//!
//! Walks the scan root once, parsing every file whose extension marks it a
//! project manifest (`.csproj`, `.fsproj`, `.vbproj`) or a solution manifest
//! (`.sln`). Manifests are lightweight MSBuild-style XML; we do not pull in
//! a full XML parser (none of the retrieved repos needed one for anything
//! resembling this), so reference/package/test-property extraction uses
//! targeted regular expressions, consistent with the ad hoc string
//! extraction style already used for command parsing elsewhere in this
//! codebase.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreError, Result};
use crate::project::{to_forward_slash, Project, Solution};

const PROJECT_EXTENSIONS: &[&str] = &["csproj", "fsproj", "vbproj"];
const SOLUTION_EXTENSIONS: &[&str] = &["sln"];

/// Lines of interest look like:
/// Project("{guid}") = "Core", "src\Core\Core.csproj", "{guid}"
static PROJECT_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^Project\([^)]*\)\s*=\s*"[^"]*"\s*,\s*"([^"]+)""#).unwrap());

static PROJECT_REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<ProjectReference\s+Include\s*=\s*"([^"]+)""#).unwrap());

static PACKAGE_REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<PackageReference\s+Include\s*=\s*"([^"]+)""#).unwrap());

static IS_TEST_PROJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<IsTestProject>\s*true\s*</IsTestProject>"#).unwrap());

/// Well-known directories skipped during any tree walk (discovery,
/// fingerprinting, watching). Shared across the crate.
pub const SKIPPED_DIR_NAMES: &[&str] = &[
    "bin",
    "obj",
    ".git",
    ".hg",
    ".svn",
    ".vs",
    ".vscode",
    ".idea",
    "node_modules",
    "TestResults",
    ".donotnet",
];

/// Everything discovered in one pass: the flat project list and the
/// solutions that reference them.
#[derive(Debug, Default, Clone)]
pub struct Discovery {
    pub projects: Vec<Project>,
    pub solutions: Vec<Solution>,
}

/// Walk `scan_root` (a path under `repo_root`, often equal to it) and parse
/// every project/solution manifest found.
///
/// Path resolution is always anchored at `repo_root`, never at the process
/// working directory — a critical correctness requirement.
pub fn discover(repo_root: &Path, scan_root: &Path) -> Result<Discovery> {
    let mut projects = Vec::new();
    let mut solutions = Vec::new();

    let walker = WalkBuilder::new(scan_root)
        .hidden(false)
        .git_ignore(false)
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| !SKIPPED_DIR_NAMES.contains(&name))
                .unwrap_or(true)
        })
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| CoreError::DiscoveryFailure {
            path: scan_root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;
        let path = entry.path();
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if PROJECT_EXTENSIONS.contains(&ext) {
            let project = parse_project_manifest(repo_root, path)?;
            projects.push(project);
        } else if SOLUTION_EXTENSIONS.contains(&ext) {
            let solution = parse_solution_manifest(repo_root, path)?;
            solutions.push(solution);
        }
    }

    Ok(Discovery { projects, solutions })
}

fn read_manifest(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| CoreError::DiscoveryFailure {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a single project manifest, extracting references, packages, and
/// the `is-test` classification.
fn parse_project_manifest(repo_root: &Path, manifest_path: &Path) -> Result<Project> {
    let content = read_manifest(manifest_path)?;
    let directory = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let references = extract_project_references(&content, &directory);
    let packages = extract_package_references(&content);
    let declared_test = extract_is_test_project(&content);

    let name = manifest_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();

    let is_test = declared_test || Project::name_suggests_test(&name);

    let id = manifest_path
        .strip_prefix(repo_root)
        .unwrap_or(manifest_path)
        .to_path_buf();

    Ok(Project {
        id,
        name,
        directory,
        references,
        packages,
        is_test,
    })
}

fn parse_solution_manifest(repo_root: &Path, manifest_path: &Path) -> Result<Solution> {
    let content = read_manifest(manifest_path)?;
    let solution_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut members = Vec::new();
    for line in content.lines() {
        if let Some(caps) = PROJECT_LINE_RE.captures(line.trim()) {
            let rel = caps.get(1).unwrap().as_str().replace('\\', "/");
            if rel.ends_with(".csproj") || rel.ends_with(".fsproj") || rel.ends_with(".vbproj") {
                let resolved = clean_join(&solution_dir, &rel);
                members.push(resolved);
            }
        }
    }

    let name = manifest_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();

    let id = manifest_path
        .strip_prefix(repo_root)
        .unwrap_or(manifest_path)
        .to_path_buf();

    Ok(Solution { id, name, members })
}

/// Extract `<ProjectReference Include="..." />` paths, normalized to
/// forward slashes, cleaned, and resolved to absolute paths anchored at the
/// referencing project's directory.
fn extract_project_references(content: &str, directory: &Path) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for caps in PROJECT_REFERENCE_RE.captures_iter(content) {
        let raw = caps.get(1).unwrap().as_str().replace('\\', "/");
        let resolved = clean_join(directory, &raw);
        if seen.insert(resolved.clone()) {
            out.push(resolved);
        }
    }
    out
}

fn extract_package_references(content: &str) -> Vec<String> {
    PACKAGE_REFERENCE_RE
        .captures_iter(content)
        .map(|c| c.get(1).unwrap().as_str().to_string())
        .collect()
}

fn extract_is_test_project(content: &str) -> bool {
    IS_TEST_PROJECT_RE.is_match(content)
}

/// Join `directory` with a relative reference `raw`, normalizing `.`/`..`
/// components without touching the filesystem (the reference's target need
/// not exist at discovery time).
fn clean_join(directory: &Path, raw: &str) -> PathBuf {
    let mut components: Vec<std::path::Component> = directory.components().collect();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            other => components.push(std::path::Component::Normal(other.as_ref())),
        }
    }
    components.iter().collect()
}

/// `repo_root`-anchored absolute-path table: maps each project's resolved
/// absolute directory-join identifier to its index, used by graph
/// construction.
pub fn absolute_path_table(repo_root: &Path, projects: &[Project]) -> Vec<(PathBuf, usize)> {
    projects
        .iter()
        .enumerate()
        .map(|(idx, p)| (clean_join(repo_root, &to_forward_slash(&p.id)), idx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn discovers_projects_and_references() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        write(
            &root.join("Core/Core.csproj"),
            r#"<Project Sdk="Microsoft.NET.Sdk">
                <ItemGroup>
                    <PackageReference Include="Newtonsoft.Json" Version="13.0.1" />
                </ItemGroup>
            </Project>"#,
        );
        write(
            &root.join("Core.Tests/Core.Tests.csproj"),
            r#"<Project Sdk="Microsoft.NET.Sdk">
                <ItemGroup>
                    <ProjectReference Include="..\Core\Core.csproj" />
                </ItemGroup>
            </Project>"#,
        );

        let discovery = discover(root, root).unwrap();
        assert_eq!(discovery.projects.len(), 2);

        let test_project = discovery
            .projects
            .iter()
            .find(|p| p.name == "Core.Tests")
            .unwrap();
        assert!(test_project.is_test);
        assert_eq!(test_project.references.len(), 1);

        let core_project = discovery.projects.iter().find(|p| p.name == "Core").unwrap();
        assert!(!core_project.is_test);
        assert_eq!(core_project.packages, vec!["Newtonsoft.Json".to_string()]);
    }

    #[test]
    fn classifies_declared_test_property() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("Weird/Weird.csproj"),
            r#"<Project><PropertyGroup><IsTestProject>true</IsTestProject></PropertyGroup></Project>"#,
        );
        let discovery = discover(root, root).unwrap();
        assert!(discovery.projects[0].is_test);
    }

    #[test]
    fn parses_solution_members() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("Repo.sln"),
            "Microsoft Visual Studio Solution File, Format Version 12.00\n\
             Project(\"{FAE04EC0}\") = \"Core\", \"Core\\Core.csproj\", \"{GUID1}\"\n\
             EndProject\n\
             Project(\"{FAE04EC0}\") = \"Core.Tests\", \"Core.Tests\\Core.Tests.csproj\", \"{GUID2}\"\n\
             EndProject\n",
        );
        let discovery = discover(root, root).unwrap();
        assert_eq!(discovery.solutions.len(), 1);
        assert_eq!(discovery.solutions[0].members.len(), 2);
    }

    #[test]
    fn skips_build_output_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("Core/Core.csproj"), "<Project></Project>");
        write(&root.join("Core/bin/Debug/Core.csproj"), "<Project></Project>");
        write(&root.join("Core/obj/Core.csproj"), "<Project></Project>");
        let discovery = discover(root, root).unwrap();
        assert_eq!(discovery.projects.len(), 1);
    }
}
