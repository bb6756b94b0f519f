use std::os::unix::process::CommandExt;
use std::process::{Child, Command};

use crate::error::{Result, SandboxError};
use crate::Cancellable;

struct UnixProcessGroup(Child);

impl Cancellable for UnixProcessGroup {
    fn kill(&mut self) -> Result<()> {
        // Negative pid targets the whole process group (setsid made this
        // child its own group leader at spawn time), so grandchildren
        // `dotnet test` forks are reaped too.
        let pid = self.0.id() as libc::pid_t;
        let result = unsafe { libc::killpg(pid, libc::SIGKILL) };
        if result == 0 {
            Ok(())
        } else {
            Err(SandboxError::Kill(std::io::Error::last_os_error()))
        }
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

/// Spawn `command` as the leader of a new process group.
pub fn spawn_cancellable(command: &mut Command) -> Result<Box<dyn Cancellable>> {
    unsafe {
        command.pre_exec(|| {
            // setsid() makes the child its own session and process-group
            // leader; safe to call post-fork, pre-exec.
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let child = command.spawn().map_err(SandboxError::Spawn)?;
    Ok(Box::new(UnixProcessGroup(child)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_process_can_be_killed() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let mut handle = spawn_cancellable(&mut cmd).unwrap();
        handle.kill().unwrap();
        let status = handle.wait().unwrap();
        assert!(!status.success());
    }
}
