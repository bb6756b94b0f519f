//! Content and arguments fingerprinting.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::discovery::SKIPPED_DIR_NAMES;
use crate::error::Result;
use crate::project::to_forward_slash;

/// Extensions considered "source" for fingerprinting purposes: code and
/// manifest files. Binary contents are never hashed — see module docs on
/// why mtime+path is the deliberate trade-off.
const RECOGNIZED_SOURCE_EXTENSIONS: &[&str] = &[
    "cs", "fs", "fsi", "vb", "csproj", "fsproj", "vbproj", "sln", "props", "targets", "json",
    "config", "resx", "xaml",
];

/// A fixed-width content fingerprint: a stable digest over the ordered
/// (path, mtime) pairs of every recognized source file reachable under the
/// given directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(self) -> String {
        hex_encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex_decode(s)?;
        if bytes.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(Fingerprint(out))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute the content fingerprint for a set of directories, all relative
/// paths recorded against `repo_root`. Order-independent of filesystem walk
/// order: file paths are sorted lexicographically before hashing.
///
/// Unreadable files are silently skipped; only irrecoverable I/O during the
/// walk itself is an error.
pub fn content_fingerprint(repo_root: &Path, directories: &[PathBuf]) -> Result<Fingerprint> {
    let mut entries: BTreeSet<(String, i64)> = BTreeSet::new();

    for directory in directories {
        collect_entries(repo_root, directory, &mut entries)?;
    }

    let mut hasher = Sha256::new();
    for (rel_path, mtime) in &entries {
        hasher.update(rel_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(mtime.to_le_bytes());
        hasher.update([0u8]);
    }

    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(Fingerprint(out))
}

fn collect_entries(
    repo_root: &Path,
    directory: &Path,
    entries: &mut BTreeSet<(String, i64)>,
) -> Result<()> {
    if !directory.exists() {
        return Ok(());
    }

    let walker = ignore::WalkBuilder::new(directory)
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
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue, // unreadable entries are silently skipped
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !RECOGNIZED_SOURCE_EXTENSIONS.contains(&ext) {
            continue;
        }
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let mtime = match metadata.modified() {
            Ok(t) => t
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            Err(_) => 0,
        };
        let rel = path.strip_prefix(repo_root).unwrap_or(path);
        entries.insert((to_forward_slash(rel), mtime));
    }

    Ok(())
}

/// A fixed-width digest over the effective command and forwarded argument
/// list, plus any semantics-changing feature toggles. Two runs
/// differing only in transient flags (verbosity, UI toggles) SHOULD hash
/// identically; callers achieve this by omitting those flags from
/// `semantic_args`.
pub fn args_fingerprint(verb: &str, semantic_args: &[String]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(verb.as_bytes());
    hasher.update([0u8]);
    for arg in semantic_args {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Fingerprint(out)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn fingerprint_is_order_independent() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Core")).unwrap();
        fs::write(root.join("Core/A.cs"), "a").unwrap();
        fs::write(root.join("Core/B.cs"), "b").unwrap();

        let fp1 = content_fingerprint(root, &[root.join("Core")]).unwrap();
        let fp2 = content_fingerprint(root, &[root.join("Core")]).unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn fingerprint_changes_on_touch() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Core")).unwrap();
        fs::write(root.join("Core/A.cs"), "a").unwrap();
        let fp1 = content_fingerprint(root, &[root.join("Core")]).unwrap();

        std::thread::sleep(std::time::Duration::from_secs(1));
        let now = std::time::SystemTime::now();
        filetime_touch(&root.join("Core/A.cs"), now);

        let fp2 = content_fingerprint(root, &[root.join("Core")]).unwrap();
        assert_ne!(fp1, fp2);
    }

    fn filetime_touch(path: &std::path::Path, time: std::time::SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn hex_round_trip() {
        let fp = args_fingerprint("test", &["--force".to_string()]);
        let hex = fp.to_hex();
        let parsed = Fingerprint::from_hex(&hex).unwrap();
        assert_eq!(fp, parsed);
    }

    #[test]
    fn args_fingerprint_ignores_transient_flags_by_construction() {
        // Callers omit transient flags from semantic_args; verify the
        // fingerprint is purely a function of what's passed in.
        let fp1 = args_fingerprint("test", &["--filter".into(), "Ns.A".into()]);
        let fp2 = args_fingerprint("test", &["--filter".into(), "Ns.A".into()]);
        assert_eq!(fp1, fp2);
        let fp3 = args_fingerprint("test", &["--filter".into(), "Ns.B".into()]);
        assert_ne!(fp1, fp3);
    }
}
