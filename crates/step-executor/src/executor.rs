//! Single-step dispatch over a live browser session.
//!
//! [`StepExecutor::execute_batch`] runs steps strictly in order, one step
//! completing (waits included) before the next begins. Failures never cross
//! the step boundary: they are recorded on the step's [`ExecutedStep`] and
//! the batch stops there. The only error that escapes the batch is a dead
//! browser session.

use std::sync::Arc;
use std::time::Duration;

use futures::future::select_ok;
use futures::FutureExt;
use tokio::time::sleep;
use tracing::{debug, warn};

use testpilot_core_types::{
    ActionKind, ConsoleEntry, ConsoleLevel, ExecutedStep, NetworkCall, PerformanceMetrics, Step,
    WaitConfig,
};
use testpilot_driver::{BrowserDriver, DriverError};

use crate::errors::ExecutorError;
use crate::popups;
use crate::resolver;

/// Settle window after navigation, before popup probing.
const NAVIGATION_SETTLE: Duration = Duration::from_millis(1_000);
/// Settle window after a submit-like click.
const SUBMIT_SETTLE: Duration = Duration::from_millis(500);
/// Default bound for a bare `wait` step with no explicit duration.
const DEFAULT_WAIT_MS: u64 = 1_000;
/// Default bound for waiting on a selector's existence.
const DEFAULT_WAIT_SELECTOR_MS: u64 = 10_000;

/// Callback receiving a human-readable "current action" line per step.
pub type ProgressSink = Arc<dyn Fn(String) + Send + Sync>;

/// Everything one batch run produced.
#[derive(Default)]
pub struct BatchOutcome {
    pub steps: Vec<ExecutedStep>,
    pub screenshots: Vec<String>,
    pub metrics: PerformanceMetrics,
    pub console: Vec<ConsoleEntry>,
    pub network: Vec<NetworkCall>,
}

impl BatchOutcome {
    pub fn all_passed(&self) -> bool {
        self.steps.iter().all(|step| step.success)
    }

    pub fn first_failure(&self) -> Option<&ExecutedStep> {
        self.steps.iter().find(|step| !step.success)
    }
}

/// Executes step batches against one driver session.
pub struct StepExecutor {
    driver: Arc<dyn BrowserDriver>,
    progress: Option<ProgressSink>,
}

impl StepExecutor {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    fn report(&self, line: String) {
        if let Some(sink) = &self.progress {
            sink(line);
        }
    }

    /// Run `steps` in order, stopping after the first failure. Returns the
    /// executed records plus the diagnostics collected along the way; errors
    /// only when the session itself is gone.
    pub async fn execute_batch(
        &self,
        steps: &[Step],
        config: &WaitConfig,
    ) -> Result<BatchOutcome, ExecutorError> {
        let started = std::time::Instant::now();
        let mut outcome = BatchOutcome::default();

        for (index, step) in steps.iter().enumerate() {
            self.report(format!(
                "Executing step {}/{}: {}",
                index + 1,
                steps.len(),
                step.label()
            ));
            let record = self
                .execute_step(step, config, &mut outcome.metrics)
                .await?;
            if let Some(shot) = &record.screenshot {
                outcome.screenshots.push(shot.clone());
            }
            let failed = !record.success;
            if failed {
                warn!(
                    step = %step.label(),
                    error = record.error.as_deref().unwrap_or(""),
                    "step failed"
                );
            }
            outcome.steps.push(record);
            if failed {
                break;
            }
        }

        outcome.metrics.total_test_time += started.elapsed().as_millis() as u64;
        outcome.console = self.driver.drain_console();
        for entry in &outcome.console {
            match entry.level {
                ConsoleLevel::Error => outcome.metrics.console_errors.push(entry.text.clone()),
                ConsoleLevel::Warning => outcome.metrics.console_warnings.push(entry.text.clone()),
                _ => {}
            }
        }
        outcome.network = self.driver.drain_network();
        outcome.metrics.network_requests += outcome.network.len() as u64;
        Ok(outcome)
    }

    async fn execute_step(
        &self,
        step: &Step,
        config: &WaitConfig,
        metrics: &mut PerformanceMetrics,
    ) -> Result<ExecutedStep, ExecutorError> {
        let mut record = ExecutedStep::from_step(step);

        if let Some(ms) = step.wait_before.or(config.global_wait_time) {
            sleep(Duration::from_millis(ms)).await;
        }

        match self.dispatch(step, config, metrics, &mut record).await {
            Ok(()) => {
                record.success = true;
                // Post-action wait applies on success only.
                if let Some(ms) = step.wait_after.or(config.global_wait_time) {
                    sleep(Duration::from_millis(ms)).await;
                }
                if step.action != ActionKind::Wait {
                    if let Some(condition) = &step.wait_for_condition {
                        match self.driver.evaluate_condition(condition).await {
                            Ok(()) => {}
                            Err(err) if err.is_fatal() => return Err(err.into()),
                            // Advisory settling time, not a correctness gate.
                            Err(err) => debug!(step = %step.label(), "condition not met: {err}"),
                        }
                    }
                }
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                record.error = Some(err.to_string());
            }
        }

        if record.screenshot.is_none() {
            match self.driver.screenshot().await {
                Ok(data) => record.screenshot = Some(data),
                Err(err) => debug!("step screenshot unavailable: {err}"),
            }
        }

        Ok(record)
    }

    async fn dispatch(
        &self,
        step: &Step,
        config: &WaitConfig,
        metrics: &mut PerformanceMetrics,
        record: &mut ExecutedStep,
    ) -> Result<(), ExecutorError> {
        let selector_timeout = if config.wait_for_elements() {
            resolver::DEFAULT_SELECTOR_TIMEOUT
        } else {
            resolver::SHORT_SELECTOR_TIMEOUT
        };

        match &step.action {
            ActionKind::Navigate => {
                let url = step
                    .url
                    .as_deref()
                    .or(step.target.as_deref())
                    .ok_or(ExecutorError::MissingField {
                        action: "navigate".to_string(),
                        field: "url",
                    })?;
                self.driver.navigate(url).await?;
                self.driver.settle(NAVIGATION_SETTLE).await;
                popups::dismiss_popups(self.driver.as_ref()).await;
                if let Ok(ms) = self.driver.page_load_time_ms().await {
                    if ms > 0 {
                        metrics.page_load_time = ms;
                    }
                }
                Ok(())
            }
            ActionKind::Fill => {
                let target = required("fill", "target", step.target.as_deref())?;
                let value = required("fill", "value", step.value.as_deref())?;
                let winner =
                    resolver::resolve(self.driver.as_ref(), target, selector_timeout).await?;
                record.element = Some(winner.clone());
                resolver::apply_fill(self.driver.as_ref(), &winner, value).await
            }
            ActionKind::Click => {
                let target = required("click", "target", step.target.as_deref())?;
                let winner =
                    resolver::resolve(self.driver.as_ref(), target, selector_timeout).await?;
                record.element = Some(winner.clone());
                self.driver.click(&winner).await?;
                metrics.click_count += 1;
                if is_submit_like(&winner, step) {
                    // Logins frequently trigger permission prompts.
                    self.driver.settle(SUBMIT_SETTLE).await;
                    popups::dismiss_popups(self.driver.as_ref()).await;
                }
                Ok(())
            }
            ActionKind::Wait => self.dispatch_wait(step).await,
            ActionKind::Verify => {
                let target = required("verify", "target", step.target.as_deref())?;
                for candidate in resolver::candidates(target) {
                    match self.driver.element_exists(candidate).await {
                        Ok(true) => {
                            record.element = Some(candidate.to_string());
                            return Ok(());
                        }
                        Ok(false) => {}
                        Err(err) if err.is_fatal() => return Err(err.into()),
                        Err(err) => debug!(candidate, "presence check failed: {err}"),
                    }
                }
                Err(ExecutorError::ElementNotFound {
                    target: target.to_string(),
                })
            }
            ActionKind::Screenshot => {
                record.screenshot = Some(self.driver.screenshot().await?);
                Ok(())
            }
            ActionKind::Inspect => {
                let summary = self.driver.inspect_form_elements().await?;
                debug!(target: "testpilot::executor", %summary, "form element inspection");
                Ok(())
            }
            ActionKind::Unsupported(tag) => Err(ExecutorError::UnsupportedAction(tag.clone())),
        }
    }

    async fn dispatch_wait(&self, step: &Step) -> Result<(), ExecutorError> {
        if let Some(condition) = &step.wait_for_condition {
            self.driver.evaluate_condition(condition).await?;
            return Ok(());
        }
        if let Some(target) = step.target.as_deref() {
            let candidates = resolver::candidates(target);
            if candidates.is_empty() {
                return Err(ExecutorError::NoUsableSelector {
                    target: target.to_string(),
                });
            }
            let timeout = Duration::from_millis(
                step.value
                    .as_deref()
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(DEFAULT_WAIT_SELECTOR_MS),
            );
            let waits = candidates.into_iter().map(|candidate| {
                let candidate = candidate.to_string();
                let driver = Arc::clone(&self.driver);
                async move {
                    driver.wait_for_selector(&candidate, timeout).await?;
                    Ok::<(), DriverError>(())
                }
                .boxed()
            });
            let (_, _losers) = select_ok(waits).await?;
            return Ok(());
        }
        let ms = step
            .value
            .as_deref()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_WAIT_MS);
        sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}

fn required<'a>(
    action: &str,
    field: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, ExecutorError> {
    value.ok_or_else(|| ExecutorError::MissingField {
        action: action.to_string(),
        field,
    })
}

/// Clicks whose target or description suggests form submission get a
/// follow-up popup pass.
fn is_submit_like(winner: &str, step: &Step) -> bool {
    let haystack = format!(
        "{} {} {}",
        winner,
        step.description.as_deref().unwrap_or(""),
        step.value.as_deref().unwrap_or("")
    )
    .to_lowercase();
    ["submit", "login", "log in", "log-in", "sign in", "sign-in"]
        .iter()
        .any(|needle| haystack.contains(needle))
}
