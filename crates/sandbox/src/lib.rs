//! Platform-specific process cancellation.
//!
//! The execution engine always spawns through [`spawn_cancellable`] and
//! cancels through the returned handle's [`Cancellable::kill`], rather
//! than touching `std::process::Child` directly. On Unix the child is
//! placed in its own process group so a cancel reaches any grandchildren
//! `dotnet test` itself spawns; on Windows there is no equivalent of a
//! process group available without a job object, so cancellation kills
//! the direct child process only.

pub mod error;

pub use error::{Result, SandboxError};

use std::process::{Child, Command};

/// A spawned child process that can be force-terminated as a unit.
pub trait Cancellable {
    fn kill(&mut self) -> Result<()>;
    fn wait(&mut self) -> std::io::Result<std::process::ExitStatus>;
    fn try_wait(&mut self) -> std::io::Result<Option<std::process::ExitStatus>>;
    fn id(&self) -> u32;
    fn take_stdout(&mut self) -> Option<std::process::ChildStdout>;
    fn take_stderr(&mut self) -> Option<std::process::ChildStderr>;
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::spawn_cancellable;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::spawn_cancellable;

#[cfg(not(any(unix, windows)))]
pub fn spawn_cancellable(command: &mut Command) -> Result<Box<dyn Cancellable>> {
    let child = command.spawn().map_err(SandboxError::Spawn)?;
    Ok(Box::new(PlainChild(child)))
}

#[cfg(not(any(unix, windows)))]
struct PlainChild(Child);

#[cfg(not(any(unix, windows)))]
impl Cancellable for PlainChild {
    fn kill(&mut self) -> Result<()> {
        self.0.kill().map_err(SandboxError::Kill)
    }
    fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.0.wait()
    }
    fn try_wait(&mut self) -> std::io::Result<Option<std::process::ExitStatus>> {
        self.0.try_wait()
    }
    fn id(&self) -> u32 {
        self.0.id()
    }
    fn take_stdout(&mut self) -> Option<std::process::ChildStdout> {
        self.0.stdout.take()
    }
    fn take_stderr(&mut self) -> Option<std::process::ChildStderr> {
        self.0.stderr.take()
    }
}
