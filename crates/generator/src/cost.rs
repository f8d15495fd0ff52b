//! Token-to-dollar cost estimation.
//!
//! Rates are per token and keyed off the model name the provider was
//! configured with. The table tracks published list prices; unknown models
//! get a conservative default.

/// Estimate the dollar cost of one call from its total token count.
pub fn estimate(model: &str, total_tokens: u64) -> f64 {
    let per_token = if model.contains("gpt-4") {
        0.000_03
    } else if model.contains("gpt") {
        0.000_002
    } else if model.contains("claude-3-opus") {
        0.000_015
    } else if model.contains("claude") {
        0.000_003
    } else if model.contains("gemini") && model.contains("2.5") {
        // Higher tier kicks in past the long-context threshold.
        if total_tokens <= 128_000 {
            0.000_001_25
        } else {
            0.000_002_5
        }
    } else if model.contains("gemini") {
        if total_tokens <= 128_000 {
            0.000_000_75
        } else {
            0.000_001_5
        }
    } else {
        0.000_01
    };
    total_tokens as f64 * per_token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt4_is_priced_above_smaller_gpt_models() {
        assert!(estimate("gpt-4o", 1_000) > estimate("gpt-3.5-turbo", 1_000));
    }

    #[test]
    fn gemini_rate_steps_up_past_long_context_threshold() {
        let below = estimate("gemini-2.5-pro", 128_000) / 128_000.0;
        let above = estimate("gemini-2.5-pro", 200_000) / 200_000.0;
        assert!(above > below);
    }

    #[test]
    fn unknown_model_uses_the_fallback_rate() {
        let cost = estimate("mystery-model", 100);
        assert!((cost - 0.001).abs() < 1e-12);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(estimate("gpt-4", 0), 0.0);
    }
}
