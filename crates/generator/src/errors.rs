//! Generator error types.

use thiserror::Error;

/// Errors surfaced by a step generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Provider configuration is unusable.
    #[error("Generator configuration invalid: {0}")]
    Config(String),

    /// The request never produced a usable response.
    #[error("Generator request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status.
    #[error("Generator returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response arrived but could not be turned into steps.
    #[error("Generator response malformed: {0}")]
    MalformedResponse(String),
}
