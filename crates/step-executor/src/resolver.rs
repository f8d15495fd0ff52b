//! Candidate-selector resolution.
//!
//! A step's target is a comma-delimited list of alternative locators for
//! one logical element. All candidates are checked concurrently and the
//! first to come back usable wins; losing checks are dropped when the race
//! resolves. The list expresses preference only through which checks get
//! issued, never a guaranteed pick order.

use std::time::Duration;

use futures::future::select_ok;
use futures::FutureExt;
use tracing::debug;

use testpilot_driver::{BrowserDriver, DriverError};

use crate::errors::ExecutorError;

/// Per-candidate interactability budget when element waiting is enabled.
pub const DEFAULT_SELECTOR_TIMEOUT: Duration = Duration::from_secs(5);
/// Budget when the test opts out of element waiting.
pub const SHORT_SELECTOR_TIMEOUT: Duration = Duration::from_secs(1);

/// Split a candidate list into trimmed, non-empty selectors.
pub fn candidates(target: &str) -> Vec<&str> {
    target
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .collect()
}

/// Race every candidate's interactability check; return the first usable
/// selector. Fails with an error naming the original target string when no
/// candidate passes.
pub async fn resolve(
    driver: &dyn BrowserDriver,
    target: &str,
    timeout: Duration,
) -> Result<String, ExecutorError> {
    let candidates = candidates(target);
    if candidates.is_empty() {
        return Err(ExecutorError::NoUsableSelector {
            target: target.to_string(),
        });
    }

    let checks = candidates.into_iter().map(|candidate| {
        let candidate = candidate.to_string();
        async move {
            driver.check_selector(&candidate, timeout).await?;
            Ok::<String, DriverError>(candidate)
        }
        .boxed()
    });

    match select_ok(checks).await {
        Ok((winner, _losers)) => {
            debug!(target, winner = %winner, "selector resolved");
            Ok(winner)
        }
        Err(err) if err.is_fatal() => Err(err.into()),
        Err(err) => {
            debug!(target, last_error = %err, "no candidate usable");
            Err(ExecutorError::NoUsableSelector {
                target: target.to_string(),
            })
        }
    }
}

/// Whether a selector points at a shadow-DOM host whose input rejects
/// direct value assignment.
pub fn needs_focus_type(selector: &str) -> bool {
    selector.contains(">>") || selector.trim_start().starts_with("ion-")
}

/// Set a value on the resolved element, trying the focus-then-type
/// accommodation first for shadow-DOM hosts.
pub async fn apply_fill(
    driver: &dyn BrowserDriver,
    selector: &str,
    value: &str,
) -> Result<(), ExecutorError> {
    if needs_focus_type(selector) {
        match driver.focus_type(selector, value).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => debug!(selector, "focus-type failed, falling back: {err}"),
        }
    }
    driver.fill(selector, value).await?;
    Ok(())
}
