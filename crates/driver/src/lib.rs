//! Browser driver adapter for testpilot.
//!
//! The [`BrowserDriver`] trait is the boundary the execution engine drives:
//! navigation, interactability checks, input, waits, diagnostics. One driver
//! instance owns one live browser session for the lifetime of a single run.
//! [`ChromiumDriver`] implements the trait over the Chromium DevTools
//! Protocol; tests implement it with in-memory mocks.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use testpilot_core_types::{ConsoleEntry, NetworkCall, WaitCondition};

pub mod chromium;
pub mod errors;
pub mod observe;

pub use chromium::ChromiumDriver;
pub use errors::DriverError;

/// Launch configuration for the browser session.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub headless: bool,
    pub sandbox: bool,
    pub chrome_executable: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: false,
            chrome_executable: None,
            window_width: 1280,
            window_height: 800,
        }
    }
}

/// Capabilities of one live browser session.
///
/// `check_selector` must tolerate concurrent read-only calls against
/// different selectors; everything else is called sequentially by the
/// owning execution.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate the page to `url`.
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Resolve whether `selector` names a visible, enabled element within
    /// `timeout`. Succeeds only when the element is interactable.
    async fn check_selector(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Clear any prior content and set `value` on the element.
    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError>;

    /// Focus-then-type fallback for markup frameworks whose inputs reject
    /// direct value assignment (shadow-DOM hosts and the like).
    async fn focus_type(&self, selector: &str, value: &str) -> Result<(), DriverError>;

    /// Scroll the element into view and click it.
    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    /// Presence check without interactability requirements.
    async fn element_exists(&self, selector: &str) -> Result<bool, DriverError>;

    /// Wait for `selector` to exist, bounded by `timeout`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
        -> Result<(), DriverError>;

    /// Evaluate an advisory wait condition within its own timeout.
    async fn evaluate_condition(&self, condition: &WaitCondition) -> Result<(), DriverError>;

    /// Click the first visible element matching `selector` (optionally
    /// filtered by case-insensitive `text`). Returns whether anything was
    /// clicked.
    async fn click_visible(
        &self,
        selector: &str,
        text: Option<&str>,
    ) -> Result<bool, DriverError>;

    /// Send an Escape key press to the page.
    async fn press_escape(&self) -> Result<(), DriverError>;

    /// Capture a PNG screenshot, returned base64-encoded.
    async fn screenshot(&self) -> Result<String, DriverError>;

    /// Current page HTML.
    async fn page_content(&self) -> Result<String, DriverError>;

    /// Debug introspection of interactive form elements on the page.
    async fn inspect_form_elements(&self) -> Result<serde_json::Value, DriverError>;

    /// Page load time from navigation timing, zero when unavailable.
    async fn page_load_time_ms(&self) -> Result<u64, DriverError>;

    /// Minimum wait plus a bounded readiness probe to absorb redirects and
    /// late content; never fails.
    async fn settle(&self, min_wait: Duration);

    /// Drain console messages observed since the last drain.
    fn drain_console(&self) -> Vec<ConsoleEntry>;

    /// Drain network requests observed since the last drain.
    fn drain_network(&self) -> Vec<NetworkCall>;

    /// Tear the session down. Idempotent best effort.
    async fn close(&self) -> Result<(), DriverError>;
}
