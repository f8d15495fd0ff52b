//! Step cache policy.
//!
//! Cached sequences are trusted verbatim for replay, but a cached run
//! assumes the browser starts at the base URL, so a missing leading
//! navigation is prepended defensively. Write-back happens only on a
//! clean first pass.

use testpilot_core_types::{ActionKind, RunStatus, Step};

/// Prepend an explicit navigation to `base_url` unless the batch already
/// starts with one.
pub fn ensure_navigation_prefix(mut steps: Vec<Step>, base_url: &str) -> Vec<Step> {
    let starts_with_navigation = steps
        .first()
        .map(|step| step.action == ActionKind::Navigate)
        .unwrap_or(false);
    if !starts_with_navigation {
        steps.insert(0, Step::navigate(base_url));
    }
    steps
}

/// A run's steps become the cached sequence iff it passed on the first
/// attempt with freshly generated steps.
pub fn should_cache(status: RunStatus, used_cached_steps: bool, retry_count: u32) -> bool {
    status == RunStatus::Passed && !used_cached_steps && retry_count == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_prefix_added_when_missing() {
        let steps = vec![Step::new(ActionKind::Click).with_target("#go")];
        let normalized = ensure_navigation_prefix(steps, "https://x.test");
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].action, ActionKind::Navigate);
        assert_eq!(normalized[0].target.as_deref(), Some("https://x.test"));
    }

    #[test]
    fn existing_navigation_is_kept() {
        let steps = vec![
            Step::navigate("https://x.test/login"),
            Step::new(ActionKind::Click).with_target("#go"),
        ];
        let normalized = ensure_navigation_prefix(steps.clone(), "https://x.test");
        assert_eq!(normalized, steps);
    }

    #[test]
    fn only_a_clean_first_pass_caches() {
        assert!(should_cache(RunStatus::Passed, false, 0));
        assert!(!should_cache(RunStatus::Passed, true, 0));
        assert!(!should_cache(RunStatus::Passed, false, 1));
        assert!(!should_cache(RunStatus::Failed, false, 0));
        assert!(!should_cache(RunStatus::Error, false, 0));
    }
}
