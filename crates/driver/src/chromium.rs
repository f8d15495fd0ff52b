//! Chromium-backed implementation of [`BrowserDriver`].
//!
//! One `ChromiumDriver` owns one browser process, one page and the
//! observation taps attached to it. The launch flags mirror a hardened QA
//! profile: permission prompts are denied up front so geolocation and
//! notification dialogs cannot stall a run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use testpilot_core_types::{ConditionKind, ConsoleEntry, NetworkCall, WaitCondition};

use crate::errors::DriverError;
use crate::observe::{spawn_taps, ObservationSink};
use crate::{BrowserDriver, DriverConfig};

/// Flags that keep permission prompts from ever reaching the page.
const HARDENING_ARGS: &[&str] = &[
    "--disable-geolocation",
    "--disable-notifications",
    "--deny-permission-prompts",
    "--disable-permissions-api",
];

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const SETTLE_PROBE_BUDGET: Duration = Duration::from_secs(5);

pub struct ChromiumDriver {
    browser: Mutex<Browser>,
    page: Page,
    sink: ObservationSink,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ChromiumDriver {
    /// Launch a browser and open the blank page the run will own.
    pub async fn launch(config: DriverConfig) -> Result<Self, DriverError> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.window_width, config.window_height)
            .args(HARDENING_ARGS.iter().copied());
        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(DriverError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|err| DriverError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| DriverError::Launch(err.to_string()))?;

        let sink = ObservationSink::new();
        let mut tasks = spawn_taps(&page, sink.clone()).await;
        tasks.push(handler_task);

        info!(headless = config.headless, "browser session launched");

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            sink,
            tasks: StdMutex::new(tasks),
            closed: AtomicBool::new(false),
        })
    }

    fn map_cdp(err: impl std::fmt::Display) -> DriverError {
        let message = err.to_string();
        if message.contains("closed") || message.contains("channel") {
            DriverError::SessionClosed(message)
        } else {
            DriverError::Protocol(message)
        }
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, js: String) -> Result<T, DriverError> {
        self.page
            .evaluate(js)
            .await
            .map_err(Self::map_cdp)?
            .into_value()
            .map_err(|err| DriverError::Evaluation(err.to_string()))
    }

    /// State of one selector: `ok`, `missing`, `hidden` or `disabled`.
    async fn selector_state(&self, selector: &str) -> Result<String, DriverError> {
        // document.querySelector cannot pierce shadow hosts; for pierced
        // selectors the host's state is the best available signal.
        let probe = host_selector(selector);
        let js = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) return 'missing'; \
             const visible = !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length); \
             if (!visible) return 'hidden'; \
             if (el.disabled || el.hasAttribute('disabled')) return 'disabled'; \
             return 'ok'; }})()",
            sel = js_quote(probe)
        );
        self.eval(js).await
    }

    async fn condition_met(&self, condition: &WaitCondition) -> Result<bool, DriverError> {
        let selector = match condition.selector.as_deref() {
            Some(selector) => selector,
            // No selector means nothing to assert; mirror the lenient
            // behavior of advisory conditions.
            None => return Ok(true),
        };
        let quoted = js_quote(selector);
        let js = match condition.kind {
            ConditionKind::Visible => format!(
                "(() => {{ const el = document.querySelector({quoted}); \
                 return !!el && !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length); }})()"
            ),
            ConditionKind::Hidden => format!(
                "(() => {{ const el = document.querySelector({quoted}); \
                 return !el || !(el.offsetWidth || el.offsetHeight || el.getClientRects().length); }})()"
            ),
            ConditionKind::Enabled => format!(
                "(() => {{ const el = document.querySelector({quoted}); \
                 return !!el && !el.hasAttribute('disabled'); }})()"
            ),
            ConditionKind::Disabled => format!(
                "(() => {{ const el = document.querySelector({quoted}); \
                 return !!el && el.hasAttribute('disabled'); }})()"
            ),
            ConditionKind::Text => {
                let needle = js_quote(condition.text.as_deref().unwrap_or(""));
                format!(
                    "(() => {{ const el = document.querySelector({quoted}); \
                     return !!el && (el.textContent || '').includes({needle}); }})()"
                )
            }
            ConditionKind::Value => {
                let expected = js_quote(condition.text.as_deref().unwrap_or(""));
                format!(
                    "(() => {{ const el = document.querySelector({quoted}); \
                     return !!el && el.value === {expected}; }})()"
                )
            }
        };
        self.eval(js).await
    }

    async fn dispatch_key(&self, kind: DispatchKeyEventType, key: &str) -> Result<(), DriverError> {
        let params = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(key.to_string())
            .build()
            .map_err(DriverError::Protocol)?;
        self.page.execute(params).await.map_err(Self::map_cdp)?;
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.page
            .goto(url)
            .await
            .map_err(|err| DriverError::Navigation {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        Ok(())
    }

    async fn check_selector(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        let mut last_state;
        loop {
            match self.selector_state(selector).await {
                Ok(state) if state == "ok" => return Ok(()),
                Ok(state) => last_state = state,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => last_state = err.to_string(),
            }
            if Instant::now() >= deadline {
                return Err(DriverError::SelectorUnusable {
                    selector: selector.to_string(),
                    reason: last_state,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(host_selector(selector))
            .await
            .map_err(Self::map_cdp)?;
        element.click().await.map_err(Self::map_cdp)?;
        // Clear any prior content and let the framework observe the change.
        let js = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (el) {{ el.value = ''; el.dispatchEvent(new Event('input', {{ bubbles: true }})); }} }})()",
            sel = js_quote(host_selector(selector))
        );
        self.page.evaluate(js).await.map_err(Self::map_cdp)?;
        element.type_str(value).await.map_err(Self::map_cdp)?;
        Ok(())
    }

    async fn focus_type(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(host_selector(selector))
            .await
            .map_err(Self::map_cdp)?;
        element
            .scroll_into_view()
            .await
            .map_err(Self::map_cdp)?
            .click()
            .await
            .map_err(Self::map_cdp)?;
        let params = InsertTextParams::builder()
            .text(value.to_string())
            .build()
            .map_err(DriverError::Protocol)?;
        self.page.execute(params).await.map_err(Self::map_cdp)?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(host_selector(selector))
            .await
            .map_err(Self::map_cdp)?;
        element
            .scroll_into_view()
            .await
            .map_err(Self::map_cdp)?
            .click()
            .await
            .map_err(Self::map_cdp)?;
        Ok(())
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.page.find_element(host_selector(selector)).await.is_ok())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(host_selector(selector)).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: selector.to_string(),
                    ms: timeout.as_millis() as u64,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn evaluate_condition(&self, condition: &WaitCondition) -> Result<(), DriverError> {
        let timeout = Duration::from_millis(condition.timeout_ms());
        let deadline = Instant::now() + timeout;
        loop {
            match self.condition_met(condition).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => debug!("condition probe failed: {err}"),
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: format!(
                        "condition {:?} on {}",
                        condition.kind,
                        condition.selector.as_deref().unwrap_or("<none>")
                    ),
                    ms: timeout.as_millis() as u64,
                });
            }
            sleep(Duration::from_millis(200)).await;
        }
    }

    async fn click_visible(
        &self,
        selector: &str,
        text: Option<&str>,
    ) -> Result<bool, DriverError> {
        let needle = match text {
            Some(text) => js_quote(&text.to_lowercase()),
            None => "null".to_string(),
        };
        let js = format!(
            "(() => {{ const needle = {needle}; \
             for (const el of document.querySelectorAll({sel})) {{ \
               if (needle && !(el.textContent || '').toLowerCase().includes(needle)) continue; \
               const visible = !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length); \
               if (!visible) continue; \
               el.click(); return true; }} \
             return false; }})()",
            sel = js_quote(selector)
        );
        self.eval(js).await
    }

    async fn press_escape(&self) -> Result<(), DriverError> {
        self.dispatch_key(DispatchKeyEventType::KeyDown, "Escape")
            .await?;
        self.dispatch_key(DispatchKeyEventType::KeyUp, "Escape")
            .await
    }

    async fn screenshot(&self) -> Result<String, DriverError> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let response = self.page.execute(params).await.map_err(Self::map_cdp)?;
        Ok(response.data.clone().into())
    }

    async fn page_content(&self) -> Result<String, DriverError> {
        self.page.content().await.map_err(Self::map_cdp)
    }

    async fn inspect_form_elements(&self) -> Result<serde_json::Value, DriverError> {
        let js = "(() => ({ \
            inputs: Array.from(document.querySelectorAll('input')).map(el => ({ \
                type: el.type, name: el.name, id: el.id, placeholder: el.placeholder })), \
            buttons: Array.from(document.querySelectorAll('button')).map(el => ({ \
                type: el.type, text: (el.textContent || '').trim(), disabled: el.disabled })), \
            hosts: Array.from(document.querySelectorAll('ion-input, ion-button')).map(el => ({ \
                tag: el.tagName.toLowerCase(), \
                name: el.getAttribute('name'), \
                label: el.getAttribute('label'), \
                text: (el.textContent || '').trim() })) \
        }))()"
            .to_string();
        self.eval(js).await
    }

    async fn page_load_time_ms(&self) -> Result<u64, DriverError> {
        let js = "(() => { const t = window.performance.timing; \
                  return t.loadEventEnd > 0 ? t.loadEventEnd - t.navigationStart : 0; })()"
            .to_string();
        match self.eval::<i64>(js).await {
            Ok(ms) => Ok(ms.max(0) as u64),
            // Timing API unavailable on some pages; not worth failing for.
            Err(_) => Ok(0),
        }
    }

    async fn settle(&self, min_wait: Duration) {
        if !min_wait.is_zero() {
            sleep(min_wait).await;
        }
        let deadline = Instant::now() + SETTLE_PROBE_BUDGET;
        while Instant::now() < deadline {
            match self.eval::<String>("document.readyState".to_string()).await {
                Ok(state) if state == "complete" => return,
                Ok(_) => {}
                Err(_) => return,
            }
            sleep(Duration::from_millis(250)).await;
        }
    }

    fn drain_console(&self) -> Vec<ConsoleEntry> {
        self.sink.drain_console()
    }

    fn drain_network(&self) -> Vec<NetworkCall> {
        self.sink.drain_network()
    }

    async fn close(&self) -> Result<(), DriverError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(Self::map_cdp)?;
        info!("browser session closed");
        Ok(())
    }
}

/// Quote a string as a JavaScript literal.
fn js_quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// For pierced selectors (`host >> inner`) only the host part is
/// addressable through `querySelector`.
fn host_selector(selector: &str) -> &str {
    match selector.split_once(">>") {
        Some((host, _)) => host.trim(),
        None => selector,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_quote_escapes_quotes() {
        assert_eq!(js_quote("input[name='a']"), "\"input[name='a']\"");
        assert_eq!(js_quote("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn host_selector_strips_pierce_operator() {
        assert_eq!(
            host_selector("ion-input[formcontrolname='email'] >> input"),
            "ion-input[formcontrolname='email']"
        );
        assert_eq!(host_selector("#plain"), "#plain");
    }

    #[test]
    fn default_config_is_headless_no_sandbox() {
        let config = DriverConfig::default();
        assert!(config.headless);
        assert!(!config.sandbox);
        assert!(config.chrome_executable.is_none());
    }
}
