//! Prompt assembly for generation and refinement calls.

use crate::{GenerateRequest, RefineRequest};

/// Upper bound on the HTML snapshot embedded in a refinement prompt.
pub const PAGE_SNAPSHOT_LIMIT: usize = 20_000;

/// Shared instruction block describing the step schema and selector
/// strategy expected from the model.
pub const STEP_SCHEMA_TEMPLATE: &str = r#"You are an expert QA Automation Engineer specializing in robust test scripts for modern web applications, including those built with Ionic and Angular.

Generate a sequence of test steps for the given test description. The output must be a JSON array of step objects with multiple fallback CSS selectors for resilience.

## Output Format
Return only a valid JSON array of step objects:
```json
[
  {
    "action": "The action to perform (e.g., 'click', 'fill', 'navigate')",
    "target": "A comma-separated string of prioritized CSS selectors",
    "value": "The value for 'fill' actions",
    "description": "A concise natural language description of the step"
  }
]
```

## Selector Principles
- Prioritize by specificity: stable selectors (id, formcontrolname) before generic ones.
- For shadow-DOM components like <ion-input>, pierce to the native element with the `>>` operator (e.g., `ion-input[formcontrolname='email'] >> input`).
- Infer purpose from attributes: label, formcontrolname, name, aria-label, placeholder.
- For clickable elements, append `:not([disabled])`.

Typical priority lists:
- Email/username: `ion-input[formcontrolname='email'] >> input`, `input[name='email']`, `input[type='email']`, `input[placeholder*='Email']`
- Password: `ion-input[formcontrolname='password'] >> input`, `input[name='password']`, `input[type='password']`
- Submit: `button[type='submit']:not([disabled])`, `ion-button[type='submit']:not([disabled])`

## Supported Actions
navigate, fill, click, wait, verify, screenshot

## Timing Options
Any step may carry `waitBefore` / `waitAfter` (milliseconds) or a `waitForCondition`:
`{ "type": "visible" | "hidden" | "text", "selector": "css-selector", "text": "expected", "timeout": 5000 }`"#;

/// Build the initial generation prompt.
pub fn build_generation_prompt(request: &GenerateRequest) -> String {
    let mut parts: Vec<String> = vec![
        "Convert this natural language test description into specific browser automation steps:"
            .to_string(),
        format!("Base URL: {}", request.base_url),
        format!("Test Description: \"{}\"", request.description),
    ];

    if let Some(context) = &request.prerequisite_context {
        parts.push(format!("Important Context: {context}"));
        parts.push(
            "Note: The prerequisite steps will be executed automatically before your generated \
             steps. Generate steps that continue from where the prerequisites end."
                .to_string(),
        );
    }

    if let Some(wait) = &request.wait_config {
        let mut instructions = Vec::new();
        if let Some(ms) = wait.global_wait_time {
            instructions.push(format!("- Add a {ms}ms wait between steps when needed"));
        }
        if wait.wait_for_elements() {
            instructions.push(
                "- Include wait conditions for elements to be visible/clickable before \
                 interacting"
                    .to_string(),
            );
        }
        if !instructions.is_empty() {
            parts.push("Wait Configuration:".to_string());
            parts.push(instructions.join("\n"));
            parts.push(
                "Note: You can add \"waitBefore\" or \"waitAfter\" properties to steps, or \
                 \"waitForCondition\" for smart waiting."
                    .to_string(),
            );
        }
    }

    if let Some(credentials) = &request.credentials {
        parts.push(format!(
            "Available credentials:\n{}",
            serde_json::to_string_pretty(credentials).unwrap_or_default()
        ));
    }
    if let Some(inputs) = &request.form_inputs {
        parts.push(format!(
            "Form data to use:\n{}",
            serde_json::to_string_pretty(inputs).unwrap_or_default()
        ));
    }

    parts.push(STEP_SCHEMA_TEMPLATE.to_string());
    parts.join("\n\n")
}

/// Build the refinement prompt from a failure and the current page state.
pub fn build_refinement_prompt(request: &RefineRequest) -> String {
    let mut parts: Vec<String> = vec![
        "The previous attempt to execute the test failed. Analyze the failure and generate a \
         NEW sequence of steps to complete the remaining part of the test."
            .to_string(),
        format!("Base URL: {}", request.base_url),
        format!("Original Test Description: \"{}\"", request.description),
        format!(
            "Failed Step: {}",
            serde_json::to_string(&request.failed_step).unwrap_or_default()
        ),
        format!("Error Message: \"{}\"", request.error),
    ];

    if !request.successful_steps.is_empty() {
        let context: Vec<String> = request
            .successful_steps
            .iter()
            .map(|step| {
                format!(
                    "{}: {}",
                    step.action,
                    step.element.as_deref().unwrap_or("")
                )
            })
            .collect();
        parts.push(format!(
            "Previously Executed Steps (Success):\n{}",
            serde_json::to_string_pretty(&context).unwrap_or_default()
        ));
        parts.push(
            "Note: The browser is currently in the state AFTER these steps. Do NOT re-generate \
             these steps. Start from the next logical step to proceed."
                .to_string(),
        );
    }

    if let Some(source) = &request.page_source {
        parts.push(format!(
            "Current Page HTML Snapshot (use this to find correct selectors):\n```html\n{}\n```",
            truncate_snapshot(source)
        ));
    }

    if let Some(credentials) = &request.credentials {
        parts.push(format!(
            "Available credentials:\n{}",
            serde_json::to_string_pretty(credentials).unwrap_or_default()
        ));
    }
    if let Some(inputs) = &request.form_inputs {
        parts.push(format!(
            "Form data to use:\n{}",
            serde_json::to_string_pretty(inputs).unwrap_or_default()
        ));
    }

    parts.push(
        "Based on the failure and the current page state, provide a CORRECTED sequence of JSON \
         steps to complete the goal.\nIf the error was due to a wrong selector, use the provided \
         HTML to find a better one.\nIf the error was a timeout, consider adding a wait step or \
         checking for a different condition."
            .to_string(),
    );
    parts.push(STEP_SCHEMA_TEMPLATE.to_string());
    parts.join("\n\n")
}

/// Cap a page snapshot at [`PAGE_SNAPSHOT_LIMIT`] bytes on a character
/// boundary, marking the cut.
pub fn truncate_snapshot(html: &str) -> String {
    if html.len() <= PAGE_SNAPSHOT_LIMIT {
        return html.to_string();
    }
    let mut end = PAGE_SNAPSHOT_LIMIT;
    while !html.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &html[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use testpilot_core_types::{ActionKind, ExecutedStep, Step};

    #[test]
    fn snapshot_truncation_marks_the_cut() {
        let long = "x".repeat(PAGE_SNAPSHOT_LIMIT * 2);
        let truncated = truncate_snapshot(&long);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() < long.len());
        assert!(truncated.len() <= PAGE_SNAPSHOT_LIMIT + "... (truncated)".len());

        let short = "<html></html>";
        assert_eq!(truncate_snapshot(short), short);
    }

    #[test]
    fn generation_prompt_carries_context_sections() {
        let request = GenerateRequest {
            base_url: "https://x.test".to_string(),
            description: "log in".to_string(),
            prerequisite_context: Some("User is already registered".to_string()),
            ..Default::default()
        };
        let prompt = build_generation_prompt(&request);
        assert!(prompt.contains("Base URL: https://x.test"));
        assert!(prompt.contains("Important Context: User is already registered"));
        assert!(prompt.contains("Output Format"));
    }

    #[test]
    fn refinement_prompt_names_failure_and_prior_steps() {
        let failed = ExecutedStep::from_step(&Step::new(ActionKind::Click).with_target("#go"));
        let mut ok = ExecutedStep::from_step(&Step::navigate("https://x.test"));
        ok.success = true;
        let request = RefineRequest {
            base_url: "https://x.test".to_string(),
            description: "log in".to_string(),
            failed_step: failed,
            error: "No usable selector among candidates: #go".to_string(),
            successful_steps: vec![ok],
            page_source: Some("<html></html>".to_string()),
            credentials: None,
            form_inputs: None,
        };
        let prompt = build_refinement_prompt(&request);
        assert!(prompt.contains("No usable selector among candidates: #go"));
        assert!(prompt.contains("navigate: https://x.test"));
        assert!(prompt.contains("```html"));
    }
}
