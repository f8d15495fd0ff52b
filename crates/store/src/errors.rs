//! Store error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the flat JSON store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No {kind} with id {id}")]
    NotFound { kind: &'static str, id: String },
}
