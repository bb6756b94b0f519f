//! The persistent result cache.
//!
//! A local, single-file, single-bucket embedded key-value store. Concurrency
//! contract: multiple readers, one writer; every write is its own
//! transaction (a whole-file rewrite under an in-process `RwLock`, since
//! this is a single-process, single-machine cache — distributed caching
//! is explicitly out of scope). Entries use a fixed binary
//! layout, encoded with `byteorder`, the same crate
//! `git-internal` uses for its own fixed-endianness on-disk formats.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CoreError, Result};

/// One stored execution outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub last_run: u64,
    pub created_at: u64,
    pub output: Vec<u8>,
    pub success: bool,
    pub args: String,
}

impl CacheEntry {
    /// Encode using the fixed binary layout:
    /// `u64 last_run | u64 created_at | u32 len+output | u8 success | u32 len+args`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17 + self.output.len() + self.args.len());
        buf.write_u64::<LittleEndian>(self.last_run).unwrap();
        buf.write_u64::<LittleEndian>(self.created_at).unwrap();
        buf.write_u32::<LittleEndian>(self.output.len() as u32).unwrap();
        buf.extend_from_slice(&self.output);
        buf.write_u8(self.success as u8).unwrap();
        buf.write_u32::<LittleEndian>(self.args.len() as u32).unwrap();
        buf.extend_from_slice(self.args.as_bytes());
        buf
    }

    /// Decode, tolerating the legacy truncated-to-16-bytes form (missing
    /// fields become `output=empty, success=true, args=empty`), and
    /// tolerating an output-length field that claims more bytes than
    /// remain (treated as `output=empty`).
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut cursor = io::Cursor::new(bytes);
        let last_run = cursor.read_u64::<LittleEndian>().ok()?;
        let created_at = cursor.read_u64::<LittleEndian>().ok()?;

        if bytes.len() <= 16 {
            return Some(CacheEntry {
                last_run,
                created_at,
                output: Vec::new(),
                success: true,
                args: String::new(),
            });
        }

        let output_len = match cursor.read_u32::<LittleEndian>() {
            Ok(n) => n as usize,
            Err(_) => {
                return Some(CacheEntry {
                    last_run,
                    created_at,
                    output: Vec::new(),
                    success: true,
                    args: String::new(),
                })
            }
        };

        let remaining_after_len = bytes.len() - cursor.position() as usize;
        let output = if output_len > remaining_after_len {
            cursor.set_position(bytes.len() as u64);
            Vec::new()
        } else {
            let mut buf = vec![0u8; output_len];
            if cursor.read_exact(&mut buf).is_err() {
                Vec::new()
            } else {
                buf
            }
        };

        let success = match cursor.read_u8() {
            Ok(b) => b != 0,
            Err(_) => true,
        };

        let args = match cursor.read_u32::<LittleEndian>() {
            Ok(n) => {
                let n = n as usize;
                let remaining = bytes.len().saturating_sub(cursor.position() as usize);
                if n > remaining {
                    String::new()
                } else {
                    let mut buf = vec![0u8; n];
                    if cursor.read_exact(&mut buf).is_err() {
                        String::new()
                    } else {
                        String::from_utf8_lossy(&buf).into_owned()
                    }
                }
            }
            Err(_) => String::new(),
        };

        Some(CacheEntry {
            last_run,
            created_at,
            output,
            success,
            args,
        })
    }
}

/// The cache key triple: `(content-fingerprint, args-fingerprint,
/// project-identifier)`, serialized as `content:args:path`. The path is
/// placed last so a two-colon split yields the three fields even when the
/// path itself contains colons.
pub fn make_key(content: &str, args: &str, project_id: &str) -> String {
    format!("{content}:{args}:{project_id}")
}

pub fn parse_key(key: &str) -> Option<(&str, &str, &str)> {
    let first = key.find(':')?;
    let second = key[first + 1..].find(':')? + first + 1;
    Some((&key[..first], &key[first + 1..second], &key[second + 1..]))
}

/// Summary statistics over the whole bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub total: usize,
    pub oldest: Option<u64>,
    pub newest: Option<u64>,
    pub disk_bytes: u64,
}

/// A failed entry surfaced for `--failed` replay.
#[derive(Debug, Clone)]
pub struct FailedEntry {
    pub project_id: String,
    pub output: Vec<u8>,
}

struct Bucket {
    entries: HashMap<String, CacheEntry>,
}

/// The persistent result cache. Holds the whole bucket in memory (bounded
/// by the number of distinct cache keys ever written) and flushes to a
/// single file on every write, guarded by an in-process `RwLock` (multiple
/// concurrent readers, one writer at a time).
pub struct Cache {
    path: PathBuf,
    bucket: RwLock<Bucket>,
}

impl Cache {
    /// Open (creating if absent) the cache file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            load_bucket(&path).map_err(|source| CoreError::CacheIoFailure {
                path: path.clone(),
                source,
            })?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| CoreError::CacheIoFailure {
                    path: path.clone(),
                    source,
                })?;
            }
            HashMap::new()
        };

        Ok(Cache {
            path,
            bucket: RwLock::new(Bucket { entries }),
        })
    }

    /// Returns the entry if present AND its success flag is true.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        self.lookup_any(key).filter(|e| e.success)
    }

    /// Returns the entry regardless of success flag.
    pub fn lookup_any(&self, key: &str) -> Option<CacheEntry> {
        let bucket = self.bucket.read().unwrap();
        // Output bytes are cloned out before the lock is dropped, per the
        // concurrency contract documented above.
        bucket.entries.get(key).cloned()
    }

    /// Insert-or-update. On update, `created_at` is preserved; every other
    /// field is overwritten.
    pub fn mark(&self, key: &str, last_run: u64, success: bool, output: Vec<u8>, args: String) {
        let mut bucket = self.bucket.write().unwrap();
        let created_at = bucket
            .entries
            .get(key)
            .map(|e| e.created_at)
            .unwrap_or(last_run);
        bucket.entries.insert(
            key.to_string(),
            CacheEntry {
                last_run,
                created_at,
                output,
                success,
                args,
            },
        );
        let _ = flush_bucket(&self.path, &bucket.entries);
    }

    /// For each distinct project-identifier seen under `args_fingerprint`,
    /// retain only the most recent entry (by `last_run`); return those whose
    /// most-recent entry has `success = false`.
    pub fn failed_entries(&self, args_fingerprint: &str) -> Vec<FailedEntry> {
        let bucket = self.bucket.read().unwrap();
        let mut latest: HashMap<String, (&str, &CacheEntry)> = HashMap::new();

        for (key, entry) in bucket.entries.iter() {
            let Some((_, args, project_id)) = parse_key(key) else {
                continue;
            };
            if args != args_fingerprint {
                continue;
            }
            match latest.get(project_id) {
                Some((_, existing)) if existing.last_run >= entry.last_run => {}
                _ => {
                    latest.insert(project_id.to_string(), (key, entry));
                }
            }
        }

        latest
            .into_iter()
            .filter(|(_, (_, entry))| !entry.success)
            .map(|(project_id, (_, entry))| FailedEntry {
                project_id,
                output: entry.output.clone(),
            })
            .collect()
    }

    /// Two-phase eviction: collect keys older than `max_age_secs` relative
    /// to `now`, then delete them in a single rewrite transaction (avoids
    /// invalidating an in-progress read cursor).
    pub fn delete_older_than(&self, now: u64, max_age_secs: u64) -> usize {
        let mut bucket = self.bucket.write().unwrap();
        let cutoff = now.saturating_sub(max_age_secs);
        let to_delete: Vec<String> = bucket
            .entries
            .iter()
            .filter(|(_, e)| e.last_run < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &to_delete {
            bucket.entries.remove(key);
        }
        let _ = flush_bucket(&self.path, &bucket.entries);
        to_delete.len()
    }

    pub fn stats(&self) -> CacheStats {
        let bucket = self.bucket.read().unwrap();
        let oldest = bucket.entries.values().map(|e| e.last_run).min();
        let newest = bucket.entries.values().map(|e| e.last_run).max();
        let disk_bytes = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        CacheStats {
            total: bucket.entries.len(),
            oldest,
            newest,
            disk_bytes,
        }
    }

    /// Read-only cursor scan.
    pub fn iterate(&self, mut callback: impl FnMut(&str, &CacheEntry)) {
        let bucket = self.bucket.read().unwrap();
        for (key, entry) in bucket.entries.iter() {
            callback(key, entry);
        }
    }
}

/// On-disk layout: a sequence of `u32 key_len | key bytes | u32 entry_len |
/// entry bytes` records. Kept simple on purpose — this is a single-machine,
/// single-writer cache, not a general-purpose storage engine.
fn load_bucket(path: &Path) -> io::Result<HashMap<String, CacheEntry>> {
    let mut file = fs::File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    let mut entries = HashMap::new();
    let mut cursor = io::Cursor::new(&data[..]);
    while (cursor.position() as usize) < data.len() {
        let key_len = match cursor.read_u32::<LittleEndian>() {
            Ok(n) => n as usize,
            Err(_) => break,
        };
        let mut key_buf = vec![0u8; key_len];
        if cursor.read_exact(&mut key_buf).is_err() {
            break;
        }
        let entry_len = match cursor.read_u32::<LittleEndian>() {
            Ok(n) => n as usize,
            Err(_) => break,
        };
        let mut entry_buf = vec![0u8; entry_len];
        if cursor.read_exact(&mut entry_buf).is_err() {
            break;
        }
        let key = String::from_utf8_lossy(&key_buf).into_owned();
        if let Some(entry) = CacheEntry::decode(&entry_buf) {
            entries.insert(key, entry);
        }
    }
    Ok(entries)
}

fn flush_bucket(path: &Path, entries: &HashMap<String, CacheEntry>) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        for (key, entry) in entries {
            let key_bytes = key.as_bytes();
            file.write_u32::<LittleEndian>(key_bytes.len() as u32)?;
            file.write_all(key_bytes)?;
            let encoded = entry.encode();
            file.write_u32::<LittleEndian>(encoded.len() as u32)?;
            file.write_all(&encoded)?;
        }
        file.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(last_run: u64, created_at: u64, success: bool) -> CacheEntry {
        CacheEntry {
            last_run,
            created_at,
            output: b"hello".to_vec(),
            success,
            args: "--force".to_string(),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let e = entry(100, 90, true);
        let decoded = CacheEntry::decode(&e.encode()).unwrap();
        assert_eq!(e, decoded);
    }

    #[test]
    fn legacy_sixteen_byte_decode() {
        let mut buf = Vec::new();
        buf.write_u64::<LittleEndian>(5).unwrap();
        buf.write_u64::<LittleEndian>(3).unwrap();
        let decoded = CacheEntry::decode(&buf).unwrap();
        assert_eq!(decoded.last_run, 5);
        assert_eq!(decoded.created_at, 3);
        assert!(decoded.success);
        assert!(decoded.output.is_empty());
        assert!(decoded.args.is_empty());
    }

    #[test]
    fn truncated_output_length_yields_empty_output() {
        let mut buf = Vec::new();
        buf.write_u64::<LittleEndian>(5).unwrap();
        buf.write_u64::<LittleEndian>(3).unwrap();
        buf.write_u32::<LittleEndian>(1000).unwrap(); // claims far more than present
        buf.write_u8(1).unwrap();
        let decoded = CacheEntry::decode(&buf).unwrap();
        assert!(decoded.output.is_empty());
    }

    #[test]
    fn key_round_trip_with_colons_in_path() {
        let key = make_key("h1", "h2", "path/with:colons");
        let (c, a, p) = parse_key(&key).unwrap();
        assert_eq!((c, a, p), ("h1", "h2", "path/with:colons"));
    }

    #[test]
    fn mark_preserves_created_at_across_overwrites() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        cache.mark("k", 100, true, vec![], String::new());
        cache.mark("k", 200, false, vec![1], "x".to_string());
        let e = cache.lookup_any("k").unwrap();
        assert_eq!(e.created_at, 100);
        assert_eq!(e.last_run, 200);
        assert!(!e.success);
    }

    #[test]
    fn lookup_only_returns_successful_entries() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        cache.mark("k", 1, false, vec![], String::new());
        assert!(cache.lookup("k").is_none());
        assert!(cache.lookup_any("k").is_some());
    }

    #[test]
    fn failed_entries_exclude_projects_that_later_passed() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        let key1 = make_key("c1", "args", "proj");
        cache.mark(&key1, 1, false, b"fail".to_vec(), String::new());
        let key2 = make_key("c2", "args", "proj");
        cache.mark(&key2, 2, true, vec![], String::new());

        let failed = cache.failed_entries("args");
        assert!(failed.is_empty());
    }

    #[test]
    fn delete_older_than_evicts_and_reports_count() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        let now = 1_000_000u64;
        cache.mark("fresh", now, true, vec![], String::new());
        cache.mark("stale", now - 48 * 3600, true, vec![], String::new());

        let deleted = cache.delete_older_than(now, 24 * 3600);
        assert_eq!(deleted, 1);
        assert_eq!(cache.stats().total, 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = Cache::open(&path).unwrap();
            cache.mark("k", 1, true, b"out".to_vec(), "a".to_string());
        }
        let cache = Cache::open(&path).unwrap();
        let e = cache.lookup("k").unwrap();
        assert_eq!(e.output, b"out");
    }
}
