use std::os::windows::io::AsRawHandle;
use std::process::{Child, Command};

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Threading::TerminateProcess;

use crate::error::{Result, SandboxError};
use crate::Cancellable;

struct WindowsProcess(Child);

impl Cancellable for WindowsProcess {
    fn kill(&mut self) -> Result<()> {
        // No job-object process group: a direct `TerminateProcess` on the
        // child handle is the extent of cancellation on this platform.
        // Any grandchildren the test host spawns are orphaned, not killed.
        let handle = self.0.as_raw_handle() as HANDLE;
        let ok = unsafe { TerminateProcess(handle, 1) };
        if ok != 0 {
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

pub fn spawn_cancellable(command: &mut Command) -> Result<Box<dyn Cancellable>> {
    let child = command.spawn().map_err(SandboxError::Spawn)?;
    Ok(Box::new(WindowsProcess(child)))
}
