//! Error types for donotnet-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by discovery, graph construction, fingerprinting, the
/// persistent cache, test-filter derivation, and configuration loading.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Fatal: the repository root or scan root could not be walked.
    #[error("failed to discover projects under {path}: {source}")]
    DiscoveryFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A project or solution manifest failed to parse.
    #[error("failed to parse manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    /// Fatal: the cache file could not be opened at all.
    #[error("failed to open cache at {path}: {source}")]
    CacheIoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Non-fatal per file: config parsing failed and the layer is skipped.
    #[error("failed to parse config file {path}: {reason}")]
    ConfigParseFailure { path: PathBuf, reason: String },

    /// Fatal: an explicit `--config PATH` could not be parsed.
    #[error("failed to parse explicitly requested config file {path}: {reason}")]
    ConfigParseFailureExplicit { path: PathBuf, reason: String },

    /// I/O failure not otherwise classified.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
