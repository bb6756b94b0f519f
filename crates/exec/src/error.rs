use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to spawn `{command}` for {project}: {source}")]
    Spawn {
        command: String,
        project: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process for {project} exceeded its retry budget ({attempts} attempts)")]
    RetriesExhausted { project: String, attempts: u32 },

    #[error("execution was cancelled before {project} completed")]
    Cancelled { project: String },

    #[error("failed to write cache entry for {project}: {path}: {source}")]
    CacheWrite {
        project: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ExecError>;
