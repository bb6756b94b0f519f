//! Filesystem watch registration and raw-event classification.

use std::path::{Path, PathBuf};

use donotnet_core::discovery::SKIPPED_DIR_NAMES;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::Result;

/// Extensions never worth reacting to: binaries, logs, editor swap files,
/// compiled artifacts, package files.
const IGNORED_EXTENSIONS: &[&str] = &[
    "dll", "pdb", "exe", "log", "swp", "swo", "swx", "tmp", "nupkg", "zip", "bak",
];

/// A single accepted filesystem change, already mapped to its owning
/// project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub project_idx: usize,
}

/// Recursively register every directory under `root` with `watcher`,
/// skipping well-known build/VCS/editor directories. Each
/// directory is registered individually in non-recursive mode: the walk
/// itself performs the recursion so skipped directories are never
/// registered, rather than relying on the notifier's own recursive mode
/// (which has no concept of a skip list).
pub fn register_tree(watcher: &mut RecommendedWatcher, root: &Path) -> Result<()> {
    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .map(|n| !SKIPPED_DIR_NAMES.contains(&n))
                .unwrap_or(true)
        })
        .build();

    for entry in walker.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            watcher.watch(entry.path(), RecursiveMode::NonRecursive)?;
        }
    }
    Ok(())
}

/// Filter a raw notifier event to only create/modify operations, dropping
/// anything touching an ignored extension or a skipped directory name.
/// Returns one path per accepted change; a single notifier event may
/// carry several paths (e.g. a rename).
pub fn classify_event(event: &Event) -> Vec<PathBuf> {
    let accepted_kind = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    if !accepted_kind {
        return Vec::new();
    }

    event
        .paths
        .iter()
        .filter(|p| !has_ignored_extension(p))
        .filter(|p| !touches_skipped_dir(p))
        .cloned()
        .collect()
}

fn has_ignored_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IGNORED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn touches_skipped_dir(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| SKIPPED_DIR_NAMES.contains(&s))
            .unwrap_or(false)
    })
}

/// Map `path` to the project owning it by longest directory-prefix match.
/// `project_dirs` is `(absolute project directory, project
/// index)`; returns `None` if the path belongs to no known project.
pub fn owning_project(path: &Path, project_dirs: &[(PathBuf, usize)]) -> Option<usize> {
    project_dirs
        .iter()
        .filter(|(dir, _)| path.starts_with(dir))
        .max_by_key(|(dir, _)| dir.as_os_str().len())
        .map(|(_, idx)| *idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_extensions_are_dropped() {
        assert!(has_ignored_extension(Path::new("/repo/bin/Debug/App.dll")));
        assert!(!has_ignored_extension(Path::new("/repo/Core/A.cs")));
    }

    #[test]
    fn skipped_directory_components_are_dropped() {
        assert!(touches_skipped_dir(Path::new("/repo/Core/obj/Debug/A.cs")));
        assert!(!touches_skipped_dir(Path::new("/repo/Core/A.cs")));
    }

    #[test]
    fn owning_project_picks_longest_prefix() {
        let dirs = vec![
            (PathBuf::from("/repo/Core"), 0),
            (PathBuf::from("/repo/Core/Sub"), 1),
        ];
        let idx = owning_project(Path::new("/repo/Core/Sub/A.cs"), &dirs);
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn owning_project_is_none_outside_every_project() {
        let dirs = vec![(PathBuf::from("/repo/Core"), 0)];
        assert_eq!(owning_project(Path::new("/repo/Other/A.cs"), &dirs), None);
    }
}
