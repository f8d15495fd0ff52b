//! Best-effort dismissal of permission and consent popups.
//!
//! The probe table covers the deny/dismiss/close affordances seen across
//! common permission prompts and cookie banners. At most one dismissal is
//! taken per pass; when nothing matches, an Escape key press is the
//! fallback. This routine never raises and never affects step outcomes.

use tracing::debug;

use testpilot_driver::BrowserDriver;

/// One dismissal affordance: a selector plus an optional case-insensitive
/// text filter.
pub struct PopupProbe {
    pub selector: &'static str,
    pub text: Option<&'static str>,
}

/// Ordered probe list, most specific first.
pub const PROBES: &[PopupProbe] = &[
    PopupProbe {
        selector: "button",
        text: Some("never allow"),
    },
    PopupProbe {
        selector: "button",
        text: Some("block"),
    },
    PopupProbe {
        selector: "button",
        text: Some("deny"),
    },
    PopupProbe {
        selector: "button",
        text: Some("not now"),
    },
    PopupProbe {
        selector: "button",
        text: Some("no thanks"),
    },
    PopupProbe {
        selector: "button",
        text: Some("dismiss"),
    },
    PopupProbe {
        selector: "button",
        text: Some("got it"),
    },
    PopupProbe {
        selector: "[id*='cookie'] button, [class*='cookie'] button",
        text: Some("accept"),
    },
    PopupProbe {
        selector: "[id*='consent'] button, [class*='consent'] button",
        text: Some("accept"),
    },
    PopupProbe {
        selector: "[aria-label='Close'], [aria-label='close'], [aria-label='Dismiss']",
        text: None,
    },
    PopupProbe {
        selector: ".modal-close, .popup-close, .close-button, .dialog-close",
        text: None,
    },
];

/// Probe for a dismissible popup and click the first visible match.
/// Returns whether anything was dismissed.
pub async fn dismiss_popups(driver: &dyn BrowserDriver) -> bool {
    for probe in PROBES {
        match driver.click_visible(probe.selector, probe.text).await {
            Ok(true) => {
                debug!(
                    selector = probe.selector,
                    text = probe.text.unwrap_or(""),
                    "dismissed popup"
                );
                return true;
            }
            Ok(false) => {}
            Err(err) => {
                debug!(selector = probe.selector, "popup probe failed: {err}");
                return false;
            }
        }
    }
    if let Err(err) = driver.press_escape().await {
        debug!("escape fallback failed: {err}");
    }
    false
}
