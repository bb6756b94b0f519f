//! Error types for donotnet-watch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    /// Logged, loop continues, unless the notifier itself is
    /// unrecoverable (e.g. inotify instance limits exhausted).
    #[error("filesystem watcher failure: {0}")]
    WatcherFailure(#[from] notify::Error),

    #[error("the notifier is unrecoverable: {0}")]
    WatcherUnrecoverable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;
