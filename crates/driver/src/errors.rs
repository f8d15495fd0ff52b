//! Driver error types.

use thiserror::Error;

/// Errors surfaced by a browser driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Browser could not be launched.
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    /// The session died or the protocol channel is gone.
    #[error("Browser session closed: {0}")]
    SessionClosed(String),

    /// Navigation failed.
    #[error("Failed to navigate to {url}: {message}")]
    Navigation { url: String, message: String },

    /// A selector exists but is not usable, or does not exist at all.
    #[error("Selector {selector} not usable: {reason}")]
    SelectorUnusable { selector: String, reason: String },

    /// A bounded wait elapsed.
    #[error("Timed out after {ms}ms waiting for {what}")]
    Timeout { what: String, ms: u64 },

    /// Script evaluation failed.
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    /// Any other protocol-level failure.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// Whether this error means the whole session is unusable, as opposed
    /// to one element or wait misbehaving.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Launch(_) | Self::SessionClosed(_))
    }
}
