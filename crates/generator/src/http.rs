//! Chat-completions backed step generator.
//!
//! Works against any OpenAI-compatible endpoint. The model is asked for a
//! bare JSON array; a bracket-extraction fallback handles responses that
//! wrap the array in prose or a code fence.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use testpilot_core_types::Step;

use crate::cost;
use crate::errors::GeneratorError;
use crate::prompt;
use crate::{GenerateRequest, GeneratedSteps, RefineRequest, StepGenerator, TokenUsage};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Provider configuration.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            temperature: 0.1,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[derive(Debug)]
pub struct OpenAiGenerator {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self, GeneratorError> {
        if config.api_key.trim().is_empty() {
            return Err(GeneratorError::Config(
                "missing API key for step generator".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| GeneratorError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    async fn complete(&self, prompt: String) -> Result<GeneratedSteps, GeneratorError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| GeneratorError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(GeneratorError::Status { status, body });
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| GeneratorError::MalformedResponse(err.to_string()))?;

        let usage = response
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            })
            .unwrap_or_default();
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "generator usage"
        );

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                GeneratorError::MalformedResponse("response carries no content".to_string())
            })?;

        let steps = parse_steps(&content)?;
        info!(steps = steps.len(), model = %self.config.model, "steps generated");
        Ok(GeneratedSteps {
            steps,
            usage,
            cost: cost::estimate(&self.config.model, usage.total_tokens),
        })
    }
}

#[async_trait]
impl StepGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedSteps, GeneratorError> {
        self.complete(prompt::build_generation_prompt(request)).await
    }

    async fn refine(&self, request: &RefineRequest) -> Result<GeneratedSteps, GeneratorError> {
        self.complete(prompt::build_refinement_prompt(request)).await
    }
}

/// Parse the model's content as a step array, falling back to the first
/// bracketed span when the array is wrapped in prose or a code fence.
pub fn parse_steps(content: &str) -> Result<Vec<Step>, GeneratorError> {
    if let Ok(steps) = serde_json::from_str::<Vec<Step>>(content) {
        return Ok(steps);
    }
    let start = content.find('[');
    let end = content.rfind(']');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            return serde_json::from_str::<Vec<Step>>(&content[start..=end])
                .map_err(|err| GeneratorError::MalformedResponse(err.to_string()));
        }
    }
    Err(GeneratorError::MalformedResponse(
        "no JSON array found in response".to_string(),
    ))
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use testpilot_core_types::ActionKind;

    #[test]
    fn parses_a_bare_json_array() {
        let steps = parse_steps(r##"[{"action":"click","target":"#go"}]"##).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, ActionKind::Click);
    }

    #[test]
    fn extracts_an_array_from_a_code_fence() {
        let content = "Here are the steps:\n```json\n[{\"action\":\"navigate\",\"target\":\"https://x.test\"}]\n```";
        let steps = parse_steps(content).unwrap();
        assert_eq!(steps[0].action, ActionKind::Navigate);
    }

    #[test]
    fn rejects_content_without_an_array() {
        assert!(parse_steps("I could not generate steps.").is_err());
    }

    #[test]
    fn empty_api_key_is_a_config_error() {
        let err = OpenAiGenerator::new(OpenAiConfig::new("", "gpt-4o")).unwrap_err();
        assert!(matches!(err, GeneratorError::Config(_)));
    }
}
