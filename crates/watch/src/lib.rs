//! The recursive watch loop, debouncer, interactive override stack, and
//! offline coverage-map builder for donotnet.
//!
//! Nothing here spawns the execution engine itself — that stays the
//! caller's job (`donotnet-cli`'s `watch` command). This crate only turns
//! filesystem events into target-project decisions and keystrokes into
//! [`overrides::OverrideAction`]s; wiring the result into
//! `donotnet_exec::Engine` lives at the CLI boundary, matching the
//! layering `donotnet-exec` already uses against `donotnet-core`.

pub mod builder;
pub mod debounce;
pub mod error;
pub mod keyboard;
pub mod overrides;
pub mod replay;
pub mod watcher;

pub use builder::{CoverageBuildConfig, CoverageXmlParser};
pub use debounce::{DebounceState, Trigger};
pub use error::{Result, WatchError};
pub use overrides::{OverrideAction, OverrideStack};
pub use replay::{parse_failed_tests, replay_filter};
pub use watcher::{classify_event, owning_project, register_tree, WatchEvent};
