//! Trigger evaluation and pipeline orchestration for tollgate.

pub mod orchestrator;
pub mod triggers;

pub use orchestrator::{Dispatch, Orchestrator, RunCanceller, RunHandle};
pub use triggers::TriggerMatcher;
