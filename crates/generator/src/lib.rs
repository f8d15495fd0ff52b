//! Step generation boundary for testpilot.
//!
//! [`StepGenerator`] abstracts the natural-language-to-action service: an
//! initial generation call from a test description, and a refinement call
//! that turns a mid-run failure plus a page snapshot into corrected
//! remaining steps. [`OpenAiGenerator`] talks to any chat-completions
//! compatible endpoint; [`MockStepGenerator`] scripts batches for tests and
//! offline runs.

use std::collections::BTreeMap;

use async_trait::async_trait;

use testpilot_core_types::{ExecutedStep, Step, WaitConfig};

pub mod cost;
pub mod errors;
pub mod http;
pub mod mock;
pub mod prompt;
pub mod recording;

pub use errors::GeneratorError;
pub use http::{OpenAiConfig, OpenAiGenerator};
pub use mock::MockStepGenerator;

/// Token accounting reported by a provider for one call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Inputs for initial step generation.
#[derive(Clone, Debug, Default)]
pub struct GenerateRequest {
    pub base_url: String,
    pub description: String,
    pub credentials: Option<BTreeMap<String, String>>,
    pub form_inputs: Option<BTreeMap<String, serde_json::Value>>,
    /// Summary of what prerequisite steps already accomplished, so the
    /// generator does not regenerate them.
    pub prerequisite_context: Option<String>,
    pub wait_config: Option<WaitConfig>,
}

/// Inputs for failure refinement: the corrected batch covers only the
/// remaining work, given the browser state after the successful steps.
#[derive(Clone, Debug)]
pub struct RefineRequest {
    pub base_url: String,
    pub description: String,
    pub failed_step: ExecutedStep,
    pub error: String,
    pub successful_steps: Vec<ExecutedStep>,
    pub page_source: Option<String>,
    pub credentials: Option<BTreeMap<String, String>>,
    pub form_inputs: Option<BTreeMap<String, serde_json::Value>>,
}

/// One generation outcome: the step batch plus what it cost.
#[derive(Clone, Debug, Default)]
pub struct GeneratedSteps {
    pub steps: Vec<Step>,
    pub usage: TokenUsage,
    pub cost: f64,
}

/// Abstraction over step-producing services so multiple vendors can plug
/// into the execution engine.
#[async_trait]
pub trait StepGenerator: Send + Sync {
    /// Generate a fresh step batch from a test description.
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedSteps, GeneratorError>;

    /// Generate corrected remaining steps after a mid-run failure.
    async fn refine(&self, request: &RefineRequest) -> Result<GeneratedSteps, GeneratorError>;
}
