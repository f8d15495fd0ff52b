//! The adaptive execution engine.
//!
//! One [`TestRunner`] owns one browser session and drives one execution
//! from prerequisite replay through the retry state machine to the final
//! persisted result:
//!
//! resolving prerequisites -> deciding steps -> executing main batch
//! -> { refining -> executing main batch }* -> finalizing
//!
//! Prerequisite trouble and anything before the main batch are fatal and
//! finalize as `error`; an exhausted retry budget or a failed refinement
//! request finalizes as `failed`; only a clean main batch finalizes as
//! `passed`. The browser is torn down regardless of which path was taken.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use testpilot_core_types::{ExecutedStep, ExecutionResult, ResultId, RunStatus, TestDefinition};
use testpilot_driver::BrowserDriver;
use testpilot_generator::{GenerateRequest, RefineRequest, StepGenerator};
use testpilot_step_executor::{BatchOutcome, ProgressSink, StepExecutor};
use testpilot_store::TestStore;

use crate::cache;
use crate::errors::RunnerError;

/// Runs one test execution end to end against one browser session.
pub struct TestRunner {
    driver: Arc<dyn BrowserDriver>,
    generator: Arc<dyn StepGenerator>,
    store: Arc<TestStore>,
}

impl TestRunner {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        generator: Arc<dyn StepGenerator>,
        store: Arc<TestStore>,
    ) -> Self {
        Self {
            driver,
            generator,
            store,
        }
    }

    /// Persist a fresh `running` record and continue the execution in the
    /// background. Callers observe progress by re-reading the result.
    pub async fn spawn_run(
        self: Arc<Self>,
        test: TestDefinition,
    ) -> Result<ResultId, RunnerError> {
        let result = ExecutionResult::running(test.id);
        let result_id = result.id;
        self.store.save_result(&result).await?;
        tokio::spawn(async move {
            self.run(&test, result).await;
        });
        Ok(result_id)
    }

    /// Drive `test` to a terminal status, persisting the result as it
    /// evolves. Never panics or returns early: fatal conditions become the
    /// `error` status and the session is always closed.
    pub async fn run(&self, test: &TestDefinition, mut result: ExecutionResult) -> ExecutionResult {
        info!(test = %test.id, result = %result.id, "test execution started");

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let progress_store = Arc::clone(&self.store);
        let result_id = result.id;
        let forwarder = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(err) = progress_store
                    .set_current_action(result_id, Some(line))
                    .await
                {
                    debug!("progress write failed: {err}");
                }
            }
        });

        {
            let sink: ProgressSink = Arc::new(move |line| {
                let _ = tx.send(line);
            });
            let executor = StepExecutor::new(Arc::clone(&self.driver)).with_progress(sink);

            match self.execute(test, &mut result, &executor).await {
                Ok(()) => {}
                Err(err) => {
                    error!(test = %test.id, "execution aborted: {err}");
                    result.error = Some(err.to_string());
                    result.finalize(RunStatus::Error);
                }
            }
        }
        let _ = forwarder.await;

        if let Err(err) = self.driver.close().await {
            warn!("browser teardown failed: {err}");
        }
        if let Err(err) = self.store.save_result(&result).await {
            error!(result = %result.id, "final result write failed: {err}");
        }
        info!(
            test = %test.id,
            status = %result.status,
            retries = result.retry_count,
            "test execution finished"
        );
        result
    }

    async fn execute(
        &self,
        test: &TestDefinition,
        result: &mut ExecutionResult,
        executor: &StepExecutor,
    ) -> Result<(), RunnerError> {
        self.run_prerequisites(test, result, executor).await?;

        // Cached steps are always tried before invoking the generator.
        let (mut batch, used_cached) = if !test.cached_steps.is_empty() {
            info!(
                test = %test.id,
                steps = test.cached_steps.len(),
                "replaying cached steps"
            );
            (
                cache::ensure_navigation_prefix(test.cached_steps.clone(), &test.base_url),
                true,
            )
        } else {
            let request = GenerateRequest {
                base_url: test.base_url.clone(),
                description: test.description.clone(),
                credentials: test.credentials.clone(),
                form_inputs: test.form_inputs.clone(),
                prerequisite_context: prerequisite_context(&result.steps),
                wait_config: Some(test.wait_config()),
            };
            let generated = self.generator.generate(&request).await?;
            info!(steps = generated.steps.len(), "generated main test steps");
            result.cost += generated.cost;
            (generated.steps, false)
        };
        result.used_cached_steps = used_cached;

        loop {
            let outcome = executor.execute_batch(&batch, &test.wait_config()).await?;
            let first_failure = outcome.first_failure().cloned();
            self.absorb_outcome(result, outcome, true);
            self.store.save_result(result).await?;

            let failed_step = match first_failure {
                None => {
                    result.finalize(RunStatus::Passed);
                    if cache::should_cache(result.status, used_cached, result.retry_count) {
                        info!(test = %test.id, "clean first pass; caching steps");
                        self.store.update_cached_steps(test.id, batch).await?;
                    }
                    return Ok(());
                }
                Some(step) => step,
            };

            if result.retry_count >= test.max_retries {
                info!(
                    retries = result.retry_count,
                    budget = test.max_retries,
                    "retry budget exhausted"
                );
                result.finalize(RunStatus::Failed);
                return Ok(());
            }

            // Refining: ask for corrected steps covering only the
            // remaining work, given the page the failure left behind.
            let page_source = self.driver.page_content().await.ok();
            let request = RefineRequest {
                base_url: test.base_url.clone(),
                description: test.description.clone(),
                error: failed_step.error.clone().unwrap_or_default(),
                failed_step,
                successful_steps: result
                    .steps
                    .iter()
                    .filter(|step| step.success)
                    .cloned()
                    .collect(),
                page_source,
                credentials: test.credentials.clone(),
                form_inputs: test.form_inputs.clone(),
            };
            match self.generator.refine(&request).await {
                Ok(refined) => {
                    result.cost += refined.cost;
                    result.retry_count += 1;
                    info!(
                        attempt = result.retry_count,
                        steps = refined.steps.len(),
                        "retrying with refined steps"
                    );
                    batch = refined.steps;
                }
                Err(err) => {
                    warn!("refinement request failed: {err}");
                    result.finalize(RunStatus::Failed);
                    return Ok(());
                }
            }
        }
    }

    async fn run_prerequisites(
        &self,
        test: &TestDefinition,
        result: &mut ExecutionResult,
        executor: &StepExecutor,
    ) -> Result<(), RunnerError> {
        for (index, prereq_id) in test.prerequisite_tests.iter().enumerate() {
            let prereq = self
                .store
                .get_test(*prereq_id)
                .await?
                .ok_or(RunnerError::PrerequisiteMissing { id: *prereq_id })?;
            if prereq.cached_steps.is_empty() {
                return Err(RunnerError::PrerequisiteUncached {
                    description: prereq.description.clone(),
                });
            }

            info!(
                index = index + 1,
                total = test.prerequisite_tests.len(),
                description = %prereq.description,
                steps = prereq.cached_steps.len(),
                "replaying prerequisite"
            );
            let batch =
                cache::ensure_navigation_prefix(prereq.cached_steps.clone(), &prereq.base_url);
            let mut outcome = executor.execute_batch(&batch, &prereq.wait_config()).await?;

            let failures: Vec<String> = outcome
                .steps
                .iter()
                .filter(|step| !step.success)
                .map(|step| step.action.to_string())
                .collect();
            for step in &mut outcome.steps {
                step.is_prerequisite = true;
                step.prerequisite_test_id = Some(prereq.id);
                step.prerequisite_test_description = Some(prereq.description.clone());
            }
            self.absorb_outcome(result, outcome, false);
            self.store.save_result(result).await?;

            if !failures.is_empty() {
                return Err(RunnerError::PrerequisiteFailed {
                    description: prereq.description.clone(),
                    failures: failures.join(", "),
                });
            }
        }
        Ok(())
    }

    /// Fold a batch outcome into the result record. Metrics accumulate
    /// additively across batches and retry attempts.
    fn absorb_outcome(
        &self,
        result: &mut ExecutionResult,
        mut outcome: BatchOutcome,
        main_test: bool,
    ) {
        if main_test {
            for step in &mut outcome.steps {
                step.is_main_test = true;
            }
        }
        result.performance.merge(outcome.metrics);
        result.steps.extend(outcome.steps);
        result.screenshots.extend(outcome.screenshots);
        result.console_messages.extend(outcome.console);
        result.network_calls.extend(outcome.network);
    }
}

/// Summary of what prerequisite steps already accomplished, handed to the
/// generator so it continues from their end state.
fn prerequisite_context(steps: &[ExecutedStep]) -> Option<String> {
    if steps.is_empty() {
        return None;
    }
    let lines: Vec<String> = steps
        .iter()
        .map(|step| {
            format!(
                "{} on {}",
                step.action,
                step.element.as_deref().unwrap_or("page")
            )
        })
        .collect();
    Some(format!(
        "The following prerequisite steps have already been executed successfully and the \
         browser is now in the resulting state: {}",
        lines.join("; ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use testpilot_core_types::{
        ActionKind, ConsoleEntry, NetworkCall, Step, TestId, WaitCondition,
    };
    use testpilot_driver::DriverError;
    use testpilot_generator::MockStepGenerator;

    #[derive(Default)]
    struct MockDriver {
        usable: Vec<&'static str>,
        navigations: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl BrowserDriver for MockDriver {
        async fn navigate(&self, url: &str) -> Result<(), DriverError> {
            self.navigations.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn check_selector(
            &self,
            selector: &str,
            _timeout: Duration,
        ) -> Result<(), DriverError> {
            if self.usable.contains(&selector) {
                Ok(())
            } else {
                Err(DriverError::SelectorUnusable {
                    selector: selector.to_string(),
                    reason: "missing".to_string(),
                })
            }
        }

        async fn fill(&self, _selector: &str, _value: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn focus_type(&self, _selector: &str, _value: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn click(&self, _selector: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn element_exists(&self, selector: &str) -> Result<bool, DriverError> {
            Ok(self.usable.contains(&selector))
        }

        async fn wait_for_selector(
            &self,
            selector: &str,
            timeout: Duration,
        ) -> Result<(), DriverError> {
            if self.usable.contains(&selector) {
                Ok(())
            } else {
                Err(DriverError::Timeout {
                    what: selector.to_string(),
                    ms: timeout.as_millis() as u64,
                })
            }
        }

        async fn evaluate_condition(&self, _condition: &WaitCondition) -> Result<(), DriverError> {
            Ok(())
        }

        async fn click_visible(
            &self,
            _selector: &str,
            _text: Option<&str>,
        ) -> Result<bool, DriverError> {
            Ok(false)
        }

        async fn press_escape(&self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn screenshot(&self) -> Result<String, DriverError> {
            Ok("cGl4ZWxz".to_string())
        }

        async fn page_content(&self) -> Result<String, DriverError> {
            Ok("<html><body></body></html>".to_string())
        }

        async fn inspect_form_elements(&self) -> Result<serde_json::Value, DriverError> {
            Ok(serde_json::json!({}))
        }

        async fn page_load_time_ms(&self) -> Result<u64, DriverError> {
            Ok(0)
        }

        async fn settle(&self, _min_wait: Duration) {}

        fn drain_console(&self) -> Vec<ConsoleEntry> {
            Vec::new()
        }

        fn drain_network(&self) -> Vec<NetworkCall> {
            Vec::new()
        }

        async fn close(&self) -> Result<(), DriverError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        runner: TestRunner,
        driver: Arc<MockDriver>,
        generator: Arc<MockStepGenerator>,
        store: Arc<TestStore>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(driver: MockDriver, generator: MockStepGenerator) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TestStore::open(dir.path()).await.unwrap());
        let driver = Arc::new(driver);
        let generator = Arc::new(generator);
        Fixture {
            runner: TestRunner::new(driver.clone(), generator.clone(), store.clone()),
            driver,
            generator,
            store,
            _dir: dir,
        }
    }

    fn click(target: &str) -> Step {
        Step::new(ActionKind::Click).with_target(target)
    }

    async fn run(fixture: &Fixture, test: &TestDefinition) -> ExecutionResult {
        let result = ExecutionResult::running(test.id);
        fixture.store.save_result(&result).await.unwrap();
        fixture.runner.run(test, result).await
    }

    #[tokio::test]
    async fn cached_steps_skip_the_generator() {
        let fx = fixture(
            MockDriver {
                usable: vec!["#go"],
                ..Default::default()
            },
            MockStepGenerator::new(),
        )
        .await;
        let mut test = TestDefinition::new("https://x.test", "press go");
        test.cached_steps = vec![click("#go")];
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Passed);
        assert!(result.used_cached_steps);
        assert_eq!(result.cost, 0.0);
        assert_eq!(fx.generator.generate_calls(), 0);
        // A cached replay never overwrites the cache.
        let stored = fx.store.get_test(test.id).await.unwrap().unwrap();
        assert!(stored.last_successful_run.is_none());
    }

    #[tokio::test]
    async fn cached_steps_get_a_navigation_prefix() {
        let fx = fixture(
            MockDriver {
                usable: vec!["#go"],
                ..Default::default()
            },
            MockStepGenerator::new(),
        )
        .await;
        let mut test = TestDefinition::new("https://x.test", "press go");
        test.cached_steps = vec![click("#go")];
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Passed);
        assert_eq!(
            fx.driver.navigations.lock().unwrap().first().map(String::as_str),
            Some("https://x.test")
        );
        assert_eq!(result.steps[0].action, ActionKind::Navigate);
    }

    #[tokio::test]
    async fn clean_first_pass_writes_the_cache() {
        let generator = MockStepGenerator::with_batches(vec![vec![
            Step::navigate("https://x.test"),
            click("#ok"),
        ]]);
        let fx = fixture(
            MockDriver {
                usable: vec!["#ok"],
                ..Default::default()
            },
            generator,
        )
        .await;
        let test = TestDefinition::new("https://x.test", "press ok");
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Passed);
        assert!(!result.used_cached_steps);
        assert_eq!(result.retry_count, 0);

        let stored = fx.store.get_test(test.id).await.unwrap().unwrap();
        assert_eq!(stored.cached_steps.len(), 2);
        assert!(stored.last_successful_run.is_some());
    }

    #[tokio::test]
    async fn refined_retry_passes_without_caching() {
        let generator = MockStepGenerator::with_batches(vec![
            vec![Step::navigate("https://x.test"), click("#broken")],
            vec![click("#ok")],
        ]);
        let fx = fixture(
            MockDriver {
                usable: vec!["#ok"],
                ..Default::default()
            },
            generator,
        )
        .await;
        let mut test = TestDefinition::new("https://x.test", "log in");
        test.max_retries = 1;
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Passed);
        assert_eq!(result.retry_count, 1);

        // The refinement request names the failed step and its error.
        let refines = fx.generator.refine_requests();
        assert_eq!(refines.len(), 1);
        assert!(refines[0].error.contains("#broken"));
        assert!(refines[0].page_source.is_some());
        assert!(refines[0].successful_steps.iter().all(|step| step.success));

        // A pass achieved only after retries never overwrites the cache.
        let stored = fx.store.get_test(test.id).await.unwrap().unwrap();
        assert!(stored.cached_steps.is_empty());
    }

    #[tokio::test]
    async fn retry_budget_bounds_attempts() {
        let generator = MockStepGenerator::with_batches(vec![
            vec![click("#broken")],
            vec![click("#still-broken")],
            vec![click("#never-reached")],
        ]);
        let fx = fixture(MockDriver::default(), generator).await;
        let mut test = TestDefinition::new("https://x.test", "log in");
        test.max_retries = 1;
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.retry_count, 1);
        assert_eq!(fx.generator.refine_requests().len(), 1);
    }

    #[tokio::test]
    async fn refinement_failure_fails_immediately() {
        let generator = MockStepGenerator::new();
        generator.push_batch(vec![click("#broken")]);
        generator.push_failure("quota exhausted");
        let fx = fixture(MockDriver::default(), generator).await;
        let mut test = TestDefinition::new("https://x.test", "log in");
        test.max_retries = 3;
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.retry_count, 0);
    }

    #[tokio::test]
    async fn initial_generation_failure_is_an_error() {
        let generator = MockStepGenerator::new();
        generator.push_failure("provider down");
        let fx = fixture(MockDriver::default(), generator).await;
        let test = TestDefinition::new("https://x.test", "log in");
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Error);
        assert!(result.error.as_deref().unwrap().contains("provider down"));
        assert!(fx.driver.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn uncached_prerequisite_aborts_before_main_steps() {
        let fx = fixture(MockDriver::default(), MockStepGenerator::new()).await;
        let prereq = TestDefinition::new("https://x.test", "register");
        fx.store.save_test(&prereq).await.unwrap();
        let mut test = TestDefinition::new("https://x.test", "log in");
        test.prerequisite_tests = vec![prereq.id];
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Error);
        assert!(result.steps.is_empty());
        assert_eq!(fx.generator.generate_calls(), 0);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("has no cached steps"));
    }

    #[tokio::test]
    async fn missing_prerequisite_aborts_with_error() {
        let fx = fixture(MockDriver::default(), MockStepGenerator::new()).await;
        let mut test = TestDefinition::new("https://x.test", "log in");
        test.prerequisite_tests = vec![TestId::new()];
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Error);
        assert!(result.error.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn prerequisite_step_failure_is_error_not_failed() {
        let fx = fixture(MockDriver::default(), MockStepGenerator::new()).await;
        let mut prereq = TestDefinition::new("https://x.test", "register");
        prereq.cached_steps = vec![click("#missing")];
        fx.store.save_test(&prereq).await.unwrap();
        let mut test = TestDefinition::new("https://x.test", "log in");
        test.prerequisite_tests = vec![prereq.id];
        test.max_retries = 2;
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Error);
        // Prerequisite steps stay on the record, tagged as such.
        assert!(result.steps.iter().all(|step| step.is_prerequisite));
        assert!(result.steps.iter().any(|step| !step.success));
        assert_eq!(fx.generator.generate_calls(), 0);
    }

    #[tokio::test]
    async fn prerequisite_steps_are_prepended_and_tagged() {
        let fx = fixture(
            MockDriver {
                usable: vec!["#reg", "#go"],
                ..Default::default()
            },
            MockStepGenerator::new(),
        )
        .await;
        let mut prereq = TestDefinition::new("https://x.test", "register");
        prereq.cached_steps = vec![Step::navigate("https://x.test/register"), click("#reg")];
        fx.store.save_test(&prereq).await.unwrap();
        let mut test = TestDefinition::new("https://x.test", "press go");
        test.prerequisite_tests = vec![prereq.id];
        test.cached_steps = vec![click("#go")];
        fx.store.save_test(&test).await.unwrap();

        let result = run(&fx, &test).await;
        assert_eq!(result.status, RunStatus::Passed);
        let prereq_steps: Vec<_> = result
            .steps
            .iter()
            .take_while(|step| step.is_prerequisite)
            .collect();
        assert_eq!(prereq_steps.len(), 2);
        assert_eq!(
            prereq_steps[0].prerequisite_test_description.as_deref(),
            Some("register")
        );
        assert!(result
            .steps
            .iter()
            .skip(prereq_steps.len())
            .all(|step| step.is_main_test));
    }

    #[tokio::test]
    async fn spawn_run_exposes_a_running_record() {
        let fx = fixture(
            MockDriver {
                usable: vec!["#go"],
                ..Default::default()
            },
            MockStepGenerator::new(),
        )
        .await;
        let mut test = TestDefinition::new("https://x.test", "press go");
        test.cached_steps = vec![click("#go")];
        fx.store.save_test(&test).await.unwrap();

        let runner = Arc::new(TestRunner::new(
            fx.driver.clone(),
            fx.generator.clone(),
            fx.store.clone(),
        ));
        let result_id = runner.spawn_run(test).await.unwrap();

        // Visible immediately, terminal shortly after.
        assert!(fx.store.get_result(result_id).await.unwrap().is_some());
        let mut status = RunStatus::Running;
        for _ in 0..50 {
            let result = fx.store.get_result(result_id).await.unwrap().unwrap();
            status = result.status;
            if status != RunStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, RunStatus::Passed);
    }
}
