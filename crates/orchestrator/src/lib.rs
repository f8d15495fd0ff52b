//! The testpilot adaptive execution engine.
//!
//! Sequences prerequisite test chains, decides cached-versus-generated
//! steps, drives the step executor over each batch and runs the bounded
//! refinement loop before finalizing status, cost and cache write-back.

pub mod cache;
pub mod errors;
pub mod runner;

pub use cache::{ensure_navigation_prefix, should_cache};
pub use errors::RunnerError;
pub use runner::TestRunner;
