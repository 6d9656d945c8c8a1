//! Static per-model token pricing used to estimate spend when the API
//! response carries only token counts.

/// (model prefix, USD per million input tokens, USD per million output tokens)
const PRICES: &[(&str, f64, f64)] = &[
    ("claude-opus-4", 15.0, 75.0),
    ("claude-sonnet-4", 3.0, 15.0),
    ("claude-3-7-sonnet", 3.0, 15.0),
    ("claude-3-5-sonnet", 3.0, 15.0),
    ("claude-haiku-4-5", 1.0, 5.0),
    ("claude-3-5-haiku", 0.8, 4.0),
];

/// Estimated USD cost of a call, or `None` for an unknown model.
pub fn estimate_cost_usd(model: &str, input_tokens: u32, output_tokens: u32) -> Option<f64> {
    PRICES
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, input, output)| {
            (input_tokens as f64 * input + output_tokens as f64 * output) / 1_000_000.0
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_is_priced_by_prefix() {
        let cost = estimate_cost_usd("claude-sonnet-4-20250514", 1_000_000, 0).unwrap();
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_has_no_estimate() {
        assert!(estimate_cost_usd("gpt-4o", 10, 10).is_none());
    }
}
