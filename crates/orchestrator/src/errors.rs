//! Runner error types.
//!
//! Every variant here is fatal for the whole execution and maps to the
//! `error` terminal status. Step-local failures and refinement failures
//! never become a `RunnerError`; they resolve to `failed` inside the
//! retry loop.

use thiserror::Error;

use testpilot_core_types::TestId;
use testpilot_driver::DriverError;
use testpilot_generator::GeneratorError;
use testpilot_step_executor::ExecutorError;
use testpilot_store::StoreError;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// A prerequisite id points at nothing.
    #[error("Prerequisite test {id} not found")]
    PrerequisiteMissing { id: TestId },

    /// Prerequisites replay cached steps only; they are never generated.
    #[error("Prerequisite test \"{description}\" has no cached steps; run it successfully first")]
    PrerequisiteUncached { description: String },

    /// A prerequisite step failed; prerequisites are retry-free.
    #[error("Prerequisite test \"{description}\" failed. Failed steps: {failures}")]
    PrerequisiteFailed {
        description: String,
        failures: String,
    },

    /// Initial step generation failed before any main step ran.
    #[error("Failed to generate test steps: {0}")]
    Generation(#[from] GeneratorError),

    /// Browser could not be driven at all.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The session died mid-run.
    #[error("Execution aborted: {0}")]
    Execution(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ExecutorError> for RunnerError {
    fn from(err: ExecutorError) -> Self {
        Self::Execution(err.to_string())
    }
}
