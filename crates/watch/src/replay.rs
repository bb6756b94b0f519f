//! Failed-only replay: parsing failed test names out of captured output
//! and composing a re-run filter from them.

use std::collections::HashSet;

use regex::Regex;

use donotnet_core::test_filter::to_driver_expression;

/// Extract failed test names from a `dotnet test` run's captured console
/// output. Looks for the VSTest console's `Failed <FullyQualifiedName>`
/// lines (with or without a leading indent and trailing duration). A
/// format this doesn't recognize yields an empty set, which callers treat
/// as "nothing to replay" rather than an error.
pub fn parse_failed_tests(output: &str) -> HashSet<String> {
    let re = Regex::new(r"(?m)^\s*Failed\s+(\S+)").unwrap();
    re.captures_iter(output).map(|c| c[1].to_string()).collect()
}

/// Build the `dotnet test --filter` expression that re-runs exactly the
/// previously failed tests.
pub fn replay_filter(failed_tests: &HashSet<String>) -> Option<String> {
    if failed_tests.is_empty() {
        return None;
    }
    Some(to_driver_expression(failed_tests))
}
