//! Step execution error types.

use thiserror::Error;

use testpilot_driver::DriverError;

/// Errors raised while executing one step.
///
/// Only [`ExecutorError::SessionGone`] crosses the batch boundary; every
/// other variant is recorded on the failing step.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Every candidate in the step's selector list failed its check.
    #[error("No usable selector among candidates: {target}")]
    NoUsableSelector { target: String },

    /// Presence verification found nothing.
    #[error("Element not found: {target}")]
    ElementNotFound { target: String },

    /// The step omits a field its action requires.
    #[error("Step '{action}' is missing required field '{field}'")]
    MissingField {
        action: String,
        field: &'static str,
    },

    /// Action tag outside the supported set.
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    /// The browser session died; nothing further can run.
    #[error("Browser session lost: {0}")]
    SessionGone(String),

    /// A driver-level failure scoped to this step.
    #[error(transparent)]
    Driver(DriverError),
}

impl From<DriverError> for ExecutorError {
    fn from(err: DriverError) -> Self {
        if err.is_fatal() {
            Self::SessionGone(err.to_string())
        } else {
            Self::Driver(err)
        }
    }
}

impl ExecutorError {
    /// Whether this failure ends the whole execution rather than one step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionGone(_))
    }
}
