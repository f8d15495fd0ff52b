//! Recorded-transcript parsing.
//!
//! Turns the script emitted by a browser recorder (Playwright codegen
//! style) into a step sequence usable as a test's cached steps. Initial
//! navigation lines are skipped since replay always prepends its own
//! navigation to the base URL.

use tracing::debug;

use testpilot_core_types::{ActionKind, Step};

/// Parse a recorded script into steps. Lines that express no supported
/// action are skipped.
pub fn parse_transcript(content: &str) -> Vec<Step> {
    let mut steps = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("import")
            || trimmed.starts_with("test(")
            || trimmed.starts_with("});")
            || trimmed == "}"
            || trimmed.contains(".goto(")
        {
            continue;
        }

        if trimmed.contains(".click(") {
            if let Some(selector) = extract_selector(trimmed, "click") {
                steps.push(Step::new(ActionKind::Click).with_target(selector));
            }
        } else if trimmed.contains(".fill(") {
            if let (Some(selector), Some(value)) =
                (extract_selector(trimmed, "fill"), quoted_arg(trimmed, ".fill("))
            {
                steps.push(
                    Step::new(ActionKind::Fill)
                        .with_target(selector)
                        .with_value(value),
                );
            }
        } else if trimmed.contains(".check(") {
            // A check is a click for replay purposes.
            if let Some(selector) = extract_selector(trimmed, "check") {
                steps.push(Step::new(ActionKind::Click).with_target(selector));
            }
        } else if trimmed.contains(".selectOption(") {
            if let (Some(selector), Some(value)) = (
                extract_selector(trimmed, "selectOption"),
                quoted_arg(trimmed, ".selectOption("),
            ) {
                steps.push(
                    Step::new(ActionKind::Fill)
                        .with_target(selector)
                        .with_value(value),
                );
            }
        } else if trimmed.contains(".press(") {
            // Key presses have no replayable equivalent in the step set.
            debug!(line = trimmed, "skipping key-press line");
        }
    }

    steps
}

/// Pull the locator expression preceding `.{method}(` and reduce it to a
/// CSS selector where the recorder's helpers allow it. Unreducible locator
/// chains are kept verbatim.
fn extract_selector(line: &str, method: &str) -> Option<String> {
    let marker = format!(".{method}(");
    let index = line.rfind(&marker)?;
    let mut prefix = line[..index].trim();
    prefix = prefix.strip_prefix("await ").unwrap_or(prefix).trim();
    prefix = prefix.strip_prefix("page.").unwrap_or(prefix);

    if let Some(inner) = single_call_arg(prefix, "locator(") {
        return Some(inner);
    }
    if let Some(inner) = single_call_arg(prefix, "getByTestId(") {
        return Some(format!("[data-testid='{inner}']"));
    }
    if let Some(inner) = single_call_arg(prefix, "getByPlaceholder(") {
        return Some(format!("[placeholder='{inner}']"));
    }
    if let Some(inner) = single_call_arg(prefix, "getByLabel(") {
        return Some(format!(
            "[aria-label='{inner}'], [placeholder='{inner}'], [name='{inner}']"
        ));
    }

    if prefix.is_empty() {
        None
    } else {
        Some(prefix.to_string())
    }
}

/// For `helper('arg')` with no chaining, return `arg`.
fn single_call_arg(prefix: &str, helper: &str) -> Option<String> {
    let rest = prefix.strip_prefix(helper)?;
    let rest = rest.strip_suffix(')')?;
    let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = rest.strip_prefix(quote)?.strip_suffix(quote)?;
    if inner.contains(quote) {
        return None;
    }
    Some(inner.to_string())
}

/// First quoted argument of `marker` in `line`.
fn quoted_arg(line: &str, marker: &str) -> Option<String> {
    let start = line.find(marker)? + marker.len();
    let rest = &line[start..];
    let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    Some(inner[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &str = r#"
import { test, expect } from '@playwright/test';

test('recorded', async ({ page }) => {
  await page.goto('https://x.test/');
  await page.locator('#email').fill('user@example.test');
  await page.getByPlaceholder('Password').fill('hunter2');
  await page.getByTestId('login-submit').click();
  await page.getByRole('link', { name: 'Dashboard' }).click();
  await page.locator('#terms').check();
  await page.locator('#country').selectOption('DE');
  await page.locator('#search').press('Enter');
});
"#;

    #[test]
    fn parses_supported_lines_and_skips_the_rest() {
        let steps = parse_transcript(TRANSCRIPT);
        let labels: Vec<String> = steps.iter().map(|step| step.label()).collect();
        assert_eq!(
            labels,
            vec![
                "FILL: #email",
                "FILL: [placeholder='Password']",
                "CLICK: [data-testid='login-submit']",
                "CLICK: getByRole('link', { name: 'Dashboard' })",
                "CLICK: #terms",
                "FILL: #country",
            ]
        );
        assert_eq!(steps[0].value.as_deref(), Some("user@example.test"));
        assert_eq!(steps[5].value.as_deref(), Some("DE"));
    }

    #[test]
    fn goto_lines_are_never_steps() {
        let steps = parse_transcript("await page.goto('https://x.test/');");
        assert!(steps.is_empty());
    }

    #[test]
    fn locator_with_double_quotes_is_simplified() {
        let steps = parse_transcript(r#"await page.locator("button.primary").click();"#);
        assert_eq!(steps[0].target.as_deref(), Some("button.primary"));
    }
}
