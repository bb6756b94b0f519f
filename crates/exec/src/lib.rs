//! The dependency-ordered parallel execution engine.
//!
//! Workers are plain OS threads (`threadpool`), not async tasks — the
//! workload here is "wait on a `dotnet` subprocess", not "await network
//! I/O", so there is nothing for an async runtime to buy us. Workers,
//! the collector, and cancellation all communicate over `std::sync::mpsc`
//! channels; the only shared mutable state is the persistent cache, whose
//! own concurrency contract (multiple readers, one writer per transaction)
//! is documented in `donotnet_core::cache`.

pub mod cancellation;
pub mod engine;
pub mod error;
pub mod line_writer;
pub mod pool;
pub mod process;

pub use cancellation::CancellationToken;
pub use engine::{Engine, EngineConfig, RunContext, StalenessMode, Unit, UnitResult, Verb};
pub use error::{ExecError, Result};
pub use process::{ProcessOutcome, ProcessSpec};
