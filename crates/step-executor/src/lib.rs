//! Step execution for testpilot: candidate-selector resolution, per-step
//! action dispatch, wait handling and popup dismissal.
//!
//! The executor never lets a failure cross a step boundary. Each step
//! yields an [`testpilot_core_types::ExecutedStep`] record carrying its
//! success flag, error text and a best-effort screenshot; the orchestrator
//! decides what a failure means for the run.

pub mod errors;
pub mod executor;
pub mod popups;
pub mod resolver;

pub use errors::ExecutorError;
pub use executor::{BatchOutcome, ProgressSink, StepExecutor};
