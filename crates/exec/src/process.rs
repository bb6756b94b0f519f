//! Single-process execution: spawn, stream output through the
//! [`LineWriter`], retry on spawn failure, honor cancellation.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use donotnet_sandbox::spawn_cancellable;

use crate::cancellation::CancellationToken;
use crate::error::{ExecError, Result};
use crate::line_writer::LineWriter;

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: std::path::PathBuf,
    pub project_label: String,
    pub max_attempts: u32,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: &Path, label: impl Into<String>) -> Self {
        ProcessSpec {
            program: program.into(),
            args,
            cwd: cwd.to_path_buf(),
            project_label: label.into(),
            max_attempts: 1,
        }
    }

    pub fn with_retries(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

pub struct ProcessOutcome {
    pub success: bool,
    pub output: Vec<u8>,
}

/// Run `spec`, retrying spawn failures (not test failures — a failing
/// test run is a valid, final outcome) up to `max_attempts` times. Checks
/// `token` before each attempt so a cancellation requested mid-retry
/// short-circuits immediately.
pub fn run(spec: &ProcessSpec, token: &CancellationToken, mut emit: impl FnMut(&str)) -> Result<ProcessOutcome> {
    let mut last_spawn_err = None;

    for attempt in 1..=spec.max_attempts {
        if token.is_cancelled() {
            return Err(ExecError::Cancelled {
                project: spec.project_label.clone(),
            });
        }

        match run_once(spec, token, &mut emit) {
            Ok(outcome) => return Ok(outcome),
            Err(ExecError::Spawn { source, .. }) => {
                tracing::warn!(project = %spec.project_label, attempt, "spawn failed, retrying");
                last_spawn_err = Some(source);
            }
            Err(other) => return Err(other),
        }
    }

    Err(ExecError::Spawn {
        command: spec.program.clone(),
        project: spec.project_label.clone(),
        source: last_spawn_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "spawn retries exhausted")),
    })
}

fn run_once(spec: &ProcessSpec, token: &CancellationToken, emit: &mut impl FnMut(&str)) -> Result<ProcessOutcome> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = spawn_cancellable(&mut command).map_err(|e| ExecError::Spawn {
        command: spec.program.clone(),
        project: spec.project_label.clone(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    })?;

    let stdout = child.take_stdout();
    let stderr = child.take_stderr();

    // stdout and stderr are merged into a single channel "as received"
    // (spec §5) rather than each drained to completion independently and
    // concatenated afterward, so interleaving reflects real wall-clock
    // order and a failure indicator on either stream flips to passthrough
    // immediately instead of only after the whole process exits.
    let (tx, rx) = std::sync::mpsc::channel::<String>();
    let stdout_handle = stdout.map(|s| {
        let tx = tx.clone();
        thread::spawn(move || feed_lines(s, &tx))
    });
    let stderr_handle = stderr.map(|s| {
        let tx = tx.clone();
        thread::spawn(move || feed_lines(s, &tx))
    });
    drop(tx);

    let mut writer = LineWriter::new(&spec.project_label, |line: &str| emit(line));
    let poll = std::time::Duration::from_millis(25);
    loop {
        match rx.recv_timeout(poll) {
            Ok(line) => writer.push_line(&line),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if token.is_cancelled() {
                    let _ = child.kill();
                    return Err(ExecError::Cancelled {
                        project: spec.project_label.clone(),
                    });
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(handle) = stdout_handle {
        let _ = handle.join();
    }
    if let Some(handle) = stderr_handle {
        let _ = handle.join();
    }

    let status = match child.wait() {
        Ok(status) => status,
        Err(e) => {
            return Err(ExecError::Spawn {
                command: spec.program.clone(),
                project: spec.project_label.clone(),
                source: e,
            })
        }
    };

    Ok(ProcessOutcome {
        success: status.success(),
        output: writer.into_output(),
    })
}

fn feed_lines(reader: impl std::io::Read, tx: &std::sync::mpsc::Sender<String>) {
    for line in BufReader::new(reader).lines().map_while(std::io::Result::ok) {
        if tx.send(line).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn successful_process_reports_success_and_captures_output() {
        let dir = tempdir().unwrap();
        let spec = ProcessSpec::new("echo", vec!["hello".to_string()], dir.path(), "Echo.Project");
        let token = CancellationToken::new();
        let outcome = run(&spec, &token, |_| {}).unwrap();
        assert!(outcome.success);
        assert!(String::from_utf8_lossy(&outcome.output).contains("hello"));
    }

    #[test]
    fn nonzero_exit_is_reported_as_failure_not_an_error() {
        let dir = tempdir().unwrap();
        let spec = ProcessSpec::new("false", vec![], dir.path(), "Failing.Project");
        let token = CancellationToken::new();
        let outcome = run(&spec, &token, |_| {}).unwrap();
        assert!(!outcome.success);
    }

    #[test]
    fn cancellation_before_spawn_short_circuits() {
        let dir = tempdir().unwrap();
        let spec = ProcessSpec::new("sleep", vec!["5".to_string()], dir.path(), "Slow.Project");
        let token = CancellationToken::new();
        token.cancel();
        let result = run(&spec, &token, |_| {});
        assert!(matches!(result, Err(ExecError::Cancelled { .. })));
    }

    #[test]
    fn cancellation_mid_run_kills_the_child() {
        let dir = tempdir().unwrap();
        let spec = ProcessSpec::new("sleep", vec!["5".to_string()], dir.path(), "Slow.Project");
        let token = CancellationToken::new();
        let watcher_token = token.clone();
        thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(50));
            watcher_token.cancel();
        });
        let start = std::time::Instant::now();
        let result = run(&spec, &token, |_| {});
        assert!(matches!(result, Err(ExecError::Cancelled { .. })));
        assert!(start.elapsed() < std::time::Duration::from_secs(4), "cancellation should not wait for the sleep to finish");
    }

    #[test]
    fn unknown_binary_retries_then_surfaces_spawn_error() {
        let dir = tempdir().unwrap();
        let spec =
            ProcessSpec::new("definitely-not-a-real-binary", vec![], dir.path(), "Ghost.Project").with_retries(2);
        let token = CancellationToken::new();
        let result = run(&spec, &token, |_| {});
        assert!(matches!(result, Err(ExecError::Spawn { .. })));
    }
}
