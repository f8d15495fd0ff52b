//! Deterministic generator used for tests and offline development.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use testpilot_core_types::Step;

use crate::errors::GeneratorError;
use crate::{GenerateRequest, GeneratedSteps, RefineRequest, StepGenerator};

type ScriptedBatch = Result<Vec<Step>, String>;

/// Scripted provider: batches are handed out in order across `generate`
/// and `refine` calls; a scripted failure surfaces as a request error.
#[derive(Default)]
pub struct MockStepGenerator {
    batches: Mutex<VecDeque<ScriptedBatch>>,
    generate_requests: Mutex<Vec<GenerateRequest>>,
    refine_requests: Mutex<Vec<RefineRequest>>,
}

impl MockStepGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batches(batches: Vec<Vec<Step>>) -> Self {
        let mock = Self::new();
        for batch in batches {
            mock.push_batch(batch);
        }
        mock
    }

    pub fn push_batch(&self, steps: Vec<Step>) {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).push_back(Ok(steps));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).push_back(Err(message.into()));
    }

    /// Requests seen by `generate`, in call order.
    pub fn generate_requests(&self) -> Vec<GenerateRequest> {
        self.generate_requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Requests seen by `refine`, in call order.
    pub fn refine_requests(&self) -> Vec<RefineRequest> {
        self.refine_requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_batch(&self) -> Result<GeneratedSteps, GeneratorError> {
        match self.batches.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
            Some(Ok(steps)) => Ok(GeneratedSteps {
                steps,
                ..Default::default()
            }),
            Some(Err(message)) => Err(GeneratorError::Request(message)),
            None => Err(GeneratorError::Request(
                "mock generator has no scripted batches left".to_string(),
            )),
        }
    }
}

#[async_trait]
impl StepGenerator for MockStepGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedSteps, GeneratorError> {
        self.generate_requests.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
        self.next_batch()
    }

    async fn refine(&self, request: &RefineRequest) -> Result<GeneratedSteps, GeneratorError> {
        self.refine_requests.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
        self.next_batch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testpilot_core_types::ActionKind;

    #[tokio::test]
    async fn batches_are_handed_out_in_order() {
        let mock = MockStepGenerator::with_batches(vec![
            vec![Step::navigate("https://x.test")],
            vec![Step::new(ActionKind::Click).with_target("#go")],
        ]);
        let first = mock.generate(&GenerateRequest::default()).await.unwrap();
        assert_eq!(first.steps[0].action, ActionKind::Navigate);
        let second = mock
            .refine(&RefineRequest {
                base_url: String::new(),
                description: String::new(),
                failed_step: testpilot_core_types::ExecutedStep::from_step(&Step::new(
                    ActionKind::Click,
                )),
                error: String::new(),
                successful_steps: Vec::new(),
                page_source: None,
                credentials: None,
                form_inputs: None,
            })
            .await
            .unwrap();
        assert_eq!(second.steps[0].action, ActionKind::Click);
        assert_eq!(mock.generate_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_failure_surfaces_as_request_error() {
        let mock = MockStepGenerator::new();
        mock.push_failure("quota exhausted");
        let err = mock.generate(&GenerateRequest::default()).await.unwrap_err();
        assert!(err.to_string().contains("quota exhausted"));
    }
}
