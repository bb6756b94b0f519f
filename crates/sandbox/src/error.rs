use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to terminate process group: {0}")]
    Kill(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
