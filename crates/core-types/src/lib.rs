//! Shared domain model for the testpilot adaptive execution engine.
//!
//! Every crate in the workspace speaks these types: test definitions and
//! their cached step sequences, the steps themselves, execution results and
//! the observation records collected while a run is in flight. Field names
//! serialize in camelCase so stored JSON matches the wire shapes the rest of
//! the tooling expects.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a test definition.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TestId(pub Uuid);

impl TestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for one execution attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ResultId(pub Uuid);

impl ResultId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResultId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ResultId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Action kind for a single step.
///
/// The set is closed; tags outside it survive deserialization as
/// `Unsupported` so one malformed step fails at execution time with a
/// descriptive error instead of poisoning the whole batch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    Navigate,
    Fill,
    Click,
    Wait,
    Verify,
    Screenshot,
    Inspect,
    Unsupported(String),
}

impl From<String> for ActionKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "navigate" => Self::Navigate,
            "fill" => Self::Fill,
            "click" => Self::Click,
            "wait" => Self::Wait,
            "verify" => Self::Verify,
            "screenshot" => Self::Screenshot,
            "inspect" => Self::Inspect,
            _ => Self::Unsupported(tag),
        }
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Navigate => "navigate",
            Self::Fill => "fill",
            Self::Click => "click",
            Self::Wait => "wait",
            Self::Verify => "verify",
            Self::Screenshot => "screenshot",
            Self::Inspect => "inspect",
            Self::Unsupported(tag) => tag.as_str(),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory post-action condition kinds.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Visible,
    Hidden,
    Enabled,
    Disabled,
    Text,
    Value,
}

/// An advisory wait condition scoped to one selector.
///
/// Failing to satisfy it after a successful action never fails the step;
/// it only buys settling time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl WaitCondition {
    pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.unwrap_or(Self::DEFAULT_TIMEOUT_MS)
    }
}

/// One atomic browser action, produced by the generator or replayed from
/// a test's cache. Immutable once produced; execution yields a parallel
/// [`ExecutedStep`] record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub action: ActionKind,
    /// Comma-delimited candidate-selector list (or the URL for `navigate`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Explicit URL for `navigate` steps whose target carries selectors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_before: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_condition: Option<WaitCondition>,
}

impl Step {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            target: None,
            url: None,
            value: None,
            description: None,
            wait_before: None,
            wait_after: None,
            wait_for_condition: None,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        let mut step = Self::new(ActionKind::Navigate);
        step.target = Some(url.into());
        step
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Human-readable label used for progress reporting and logs.
    pub fn label(&self) -> String {
        let target = self
            .target
            .as_deref()
            .or(self.url.as_deref())
            .or(self.description.as_deref())
            .unwrap_or("unknown");
        format!("{}: {}", self.action.as_str().to_uppercase(), target)
    }
}

/// Wait tunables applied across a batch of steps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_wait_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_elements: Option<bool>,
}

impl WaitConfig {
    pub fn wait_for_elements(&self) -> bool {
        self.wait_for_elements.unwrap_or(true)
    }
}

/// A stored test definition, owned by the store and mutated only through
/// explicit update, cache-write and archive operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    pub id: TestId,
    pub base_url: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_inputs: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisite_tests: Vec<TestId>,
    /// Step sequence from the last clean run; overwritten wholesale.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cached_steps: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_reusable: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_wait_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_elements: Option<bool>,
    #[serde(default)]
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

impl TestDefinition {
    pub fn new(base_url: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: TestId::new(),
            base_url: base_url.into(),
            description: description.into(),
            credentials: None,
            form_inputs: None,
            prerequisite_tests: Vec::new(),
            cached_steps: Vec::new(),
            last_successful_run: None,
            tags: Vec::new(),
            is_reusable: false,
            archived: false,
            archived_at: None,
            global_wait_time: None,
            wait_for_elements: None,
            max_retries: 0,
            created_at: Utc::now(),
        }
    }

    pub fn wait_config(&self) -> WaitConfig {
        WaitConfig {
            global_wait_time: self.global_wait_time,
            wait_for_elements: self.wait_for_elements,
        }
    }
}

/// Execution record for one step, appended in real execution order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedStep {
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64 PNG captured after the step, best effort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub is_prerequisite: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prerequisite_test_id: Option<TestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prerequisite_test_description: Option<String>,
    #[serde(default)]
    pub is_main_test: bool,
}

impl ExecutedStep {
    pub fn from_step(step: &Step) -> Self {
        Self {
            action: step.action.clone(),
            element: step.target.clone().or_else(|| step.url.clone()),
            value: step.value.clone(),
            timestamp: Utc::now(),
            success: false,
            error: None,
            screenshot: None,
            is_prerequisite: false,
            prerequisite_test_id: None,
            prerequisite_test_description: None,
            is_main_test: false,
        }
    }
}

/// Terminal and in-flight status of one execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Passed,
    Failed,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Severity of a captured console message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warning,
    Error,
}

/// One console message observed during execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    #[serde(rename = "type")]
    pub level: ConsoleLevel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// One network request observed during execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCall {
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

/// Performance accounting, accumulated additively across retry attempts
/// within one execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub page_load_time: u64,
    pub total_test_time: u64,
    pub click_count: u64,
    pub network_requests: u64,
    #[serde(default)]
    pub console_errors: Vec<String>,
    #[serde(default)]
    pub console_warnings: Vec<String>,
}

impl PerformanceMetrics {
    pub fn merge(&mut self, other: PerformanceMetrics) {
        // Page load time reflects the most recent navigation, not a sum.
        if other.page_load_time > 0 {
            self.page_load_time = other.page_load_time;
        }
        self.total_test_time += other.total_test_time;
        self.click_count += other.click_count;
        self.network_requests += other.network_requests;
        self.console_errors.extend(other.console_errors);
        self.console_warnings.extend(other.console_warnings);
    }
}

/// The single mutable record for one execution attempt.
///
/// Created with status `running`, mutated in place by the owning run as
/// steps execute, finalized exactly once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub id: ResultId,
    pub test_request_id: TestId,
    pub status: RunStatus,
    #[serde(default)]
    pub steps: Vec<ExecutedStep>,
    pub performance: PerformanceMetrics,
    #[serde(default)]
    pub screenshots: Vec<String>,
    pub cost: f64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub used_cached_steps: bool,
    pub executed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Fatal-path message; set only when status is `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable progress line, written by the owning execution only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console_messages: Vec<ConsoleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_calls: Vec<NetworkCall>,
    #[serde(default)]
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    /// Fresh record visible to callers while the run proceeds in the
    /// background.
    pub fn running(test_id: TestId) -> Self {
        Self {
            id: ResultId::new(),
            test_request_id: test_id,
            status: RunStatus::Running,
            steps: Vec::new(),
            performance: PerformanceMetrics::default(),
            screenshots: Vec::new(),
            cost: 0.0,
            retry_count: 0,
            used_cached_steps: false,
            executed_at: Utc::now(),
            completed_at: None,
            error: None,
            current_action: None,
            console_messages: Vec::new(),
            network_calls: Vec::new(),
            archived: false,
            archived_at: None,
        }
    }

    pub fn finalize(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.current_action = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_round_trips_known_tags() {
        for tag in ["navigate", "fill", "click", "wait", "verify", "screenshot", "inspect"] {
            let kind: ActionKind = serde_json::from_value(serde_json::json!(tag)).unwrap();
            assert_eq!(kind.as_str(), tag);
            assert!(!matches!(kind, ActionKind::Unsupported(_)));
        }
    }

    #[test]
    fn action_kind_preserves_unknown_tags() {
        let kind: ActionKind = serde_json::from_value(serde_json::json!("hover")).unwrap();
        assert_eq!(kind, ActionKind::Unsupported("hover".to_string()));
        assert_eq!(serde_json::to_value(&kind).unwrap(), serde_json::json!("hover"));
    }

    #[test]
    fn step_label_prefers_target() {
        let step = Step::new(ActionKind::Click).with_target("#go");
        assert_eq!(step.label(), "CLICK: #go");

        let bare = Step::new(ActionKind::Screenshot);
        assert_eq!(bare.label(), "SCREENSHOT: unknown");
    }

    #[test]
    fn metrics_merge_is_additive_except_page_load() {
        let mut a = PerformanceMetrics {
            page_load_time: 120,
            total_test_time: 1_000,
            click_count: 2,
            network_requests: 5,
            console_errors: vec!["boom".into()],
            console_warnings: vec![],
        };
        a.merge(PerformanceMetrics {
            page_load_time: 0,
            total_test_time: 500,
            click_count: 1,
            network_requests: 3,
            console_errors: vec![],
            console_warnings: vec!["careful".into()],
        });
        assert_eq!(a.page_load_time, 120);
        assert_eq!(a.total_test_time, 1_500);
        assert_eq!(a.click_count, 3);
        assert_eq!(a.network_requests, 8);
        assert_eq!(a.console_errors.len(), 1);
        assert_eq!(a.console_warnings.len(), 1);
    }

    #[test]
    fn execution_result_starts_running_and_finalizes_once() {
        let mut result = ExecutionResult::running(TestId::new());
        assert_eq!(result.status, RunStatus::Running);
        assert!(result.completed_at.is_none());

        result.current_action = Some("Executing step 1/3".into());
        result.finalize(RunStatus::Passed);
        assert_eq!(result.status, RunStatus::Passed);
        assert!(result.completed_at.is_some());
        assert!(result.current_action.is_none());
    }

    #[test]
    fn step_deserializes_wire_shape() {
        let step: Step = serde_json::from_value(serde_json::json!({
            "action": "fill",
            "target": "input[name='email'], #email",
            "value": "user@example.test",
            "waitBefore": 500,
            "waitForCondition": { "type": "visible", "selector": "#email", "timeout": 3000 }
        }))
        .unwrap();
        assert_eq!(step.action, ActionKind::Fill);
        assert_eq!(step.wait_before, Some(500));
        let cond = step.wait_for_condition.unwrap();
        assert_eq!(cond.kind, ConditionKind::Visible);
        assert_eq!(cond.timeout_ms(), 3000);
    }
}
