//! Project discovery, dependency graph, content fingerprinting, the
//! persistent result cache, test-filter derivation, and layered
//! configuration for donotnet.
//!
//! This crate owns no process execution and configures no logging
//! subscriber — both are the concern of `donotnet-exec`/`donotnet-watch`
//! and `donotnet-cli` respectively. It is pure data and pure functions
//! over that data, so it stays trivially unit-testable without spawning
//! anything.

pub mod cache;
pub mod config;
pub mod coverage;
pub mod discovery;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod project;
pub mod test_filter;

pub use cache::{Cache, CacheEntry, CacheStats, FailedEntry};
pub use config::Config;
pub use coverage::{CoverageMap, Granularity};
pub use discovery::{discover, Discovery};
pub use error::{CoreError, Result};
pub use fingerprint::{args_fingerprint, content_fingerprint, Fingerprint};
pub use graph::{Graph, SolutionGrouping};
pub use project::{Project, Solution};
pub use test_filter::{
    derive_with_heuristic, extract_named_tests, user_filter_contradicts, Derivation, FilterReason,
    Heuristic, TestFilter,
};
