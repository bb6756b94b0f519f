//! Streaming line writer with failure detection.
//!
//! Every project's output is captured in full regardless, for the cache
//! entry. By default it stays buffered and silent — useful under
//! parallelism, where interleaving dozens of passing projects' console
//! output produces noise nobody reads. The moment a line matches a known
//! failure indicator (`dotnet test`/`dotnet build`'s own failure banners),
//! the writer switches to passthrough: it flushes everything buffered so
//! far and echoes every subsequent line immediately, so a failing run's
//! output streams live instead of only appearing once the whole process
//! exits.

/// Substrings that mark a line as signalling failure. Checked against the
/// line as emitted by `dotnet build`/`dotnet test`; intentionally loose
/// (substring, not full-line match) since exact banner text has drifted
/// across SDK versions.
const FAILURE_INDICATORS: &[&str] = &[
    "Build FAILED",
    "error ",
    "[FAIL]",
    "Failed!",
    "Test Run Failed.",
];

/// `dotnet test`'s own summary line (`Failed: 3, Passed: 12, ...`). Matched
/// separately from the literal substrings above because a zero count
/// (`Failed: 0`) must NOT trip failure detection.
static FAILED_COUNT_RE: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"Failed:\s*(\d+)").unwrap());

fn is_failure_indicator(line: &str) -> bool {
    if FAILURE_INDICATORS.iter().any(|marker| line.contains(marker)) {
        return true;
    }
    FAILED_COUNT_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(|n| n > 0)
        .unwrap_or(false)
}

pub struct LineWriter<F: FnMut(&str)> {
    label: String,
    captured: Vec<u8>,
    passthrough: bool,
    emit: F,
}

impl<F: FnMut(&str)> LineWriter<F> {
    pub fn new(label: impl Into<String>, emit: F) -> Self {
        LineWriter {
            label: label.into(),
            captured: Vec::new(),
            passthrough: false,
            emit,
        }
    }

    /// Feed one line (without its trailing newline) from the child
    /// process's stdout or stderr.
    pub fn push_line(&mut self, line: &str) {
        self.captured.extend_from_slice(line.as_bytes());
        self.captured.push(b'\n');

        if !self.passthrough && is_failure_indicator(line) {
            self.passthrough = true;
            // The buffer already includes this line (appended above), so
            // replaying it covers this call's emit too; emitting it again
            // below would duplicate it.
            self.replay_buffered();
            return;
        }

        if self.passthrough {
            (self.emit)(&format!("[{}] {}", self.label, line));
        }
    }

    fn replay_buffered(&mut self) {
        let text = String::from_utf8_lossy(&self.captured).into_owned();
        for buffered_line in text.lines() {
            (self.emit)(&format!("[{}] {}", self.label, buffered_line));
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    pub fn into_output(self) -> Vec<u8> {
        self.captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn stays_buffered_until_failure_indicator_seen() {
        let emitted = RefCell::new(Vec::new());
        let mut writer = LineWriter::new("Core.Tests", |line| emitted.borrow_mut().push(line.to_string()));
        writer.push_line("Starting test run.");
        writer.push_line("Passed! - 3 tests");
        assert!(!writer.is_passthrough());
        assert!(emitted.borrow().is_empty());
    }

    #[test]
    fn zero_failed_count_does_not_trip_failure_detection() {
        let emitted = RefCell::new(Vec::new());
        let mut writer = LineWriter::new("Core.Tests", |line| emitted.borrow_mut().push(line.to_string()));
        writer.push_line("Passed!  - Failed: 0, Passed: 12, Skipped: 0, Total: 12");
        assert!(!writer.is_passthrough());
    }

    #[test]
    fn nonzero_failed_count_trips_failure_detection() {
        let emitted = RefCell::new(Vec::new());
        let mut writer = LineWriter::new("Core.Tests", |line| emitted.borrow_mut().push(line.to_string()));
        writer.push_line("Failed!  - Failed: 2, Passed: 10, Skipped: 0, Total: 12");
        assert!(writer.is_passthrough());
        assert_eq!(emitted.borrow().len(), 1);
    }

    #[test]
    fn switches_to_passthrough_and_replays_buffer_on_failure() {
        let emitted = RefCell::new(Vec::new());
        let mut writer = LineWriter::new("Core.Tests", |line| emitted.borrow_mut().push(line.to_string()));
        writer.push_line("Starting test run.");
        writer.push_line("[FAIL] Namespace.Test1");
        writer.push_line("Stack trace here");

        assert!(writer.is_passthrough());
        let lines = emitted.borrow();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("Starting test run."));
        assert!(lines[1].contains("[FAIL]"));
        assert!(lines[2].contains("Stack trace"));
    }

    #[test]
    fn captured_output_includes_every_line_regardless_of_mode() {
        let mut writer = LineWriter::new("Core.Tests", |_| {});
        writer.push_line("line one");
        writer.push_line("line two");
        let output = writer.into_output();
        assert_eq!(String::from_utf8(output).unwrap(), "line one\nline two\n");
    }
}
