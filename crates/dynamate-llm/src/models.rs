/// Per-token pricing for models reachable through OpenRouter, used when the
/// response does not report its own cost.
#[derive(Clone, Debug)]
pub struct ModelPricing {
    /// Model name without the `openrouter/` routing prefix and without a date suffix.
    pub name: &'static str,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

impl ModelPricing {
    pub fn calculate_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        let input = prompt_tokens as f64 / 1_000_000.0 * self.input_cost_per_mtok;
        let output = completion_tokens as f64 / 1_000_000.0 * self.output_cost_per_mtok;
        input + output
    }
}

static PRICING: &[ModelPricing] = &[
    ModelPricing {
        name: "openai/gpt-4.1",
        input_cost_per_mtok: 2.0,
        output_cost_per_mtok: 8.0,
    },
    ModelPricing {
        name: "openai/gpt-4.1-mini",
        input_cost_per_mtok: 0.4,
        output_cost_per_mtok: 1.6,
    },
    ModelPricing {
        name: "openai/gpt-4o",
        input_cost_per_mtok: 2.5,
        output_cost_per_mtok: 10.0,
    },
    ModelPricing {
        name: "openai/gpt-4o-mini",
        input_cost_per_mtok: 0.15,
        output_cost_per_mtok: 0.6,
    },
    ModelPricing {
        name: "anthropic/claude-sonnet-4",
        input_cost_per_mtok: 3.0,
        output_cost_per_mtok: 15.0,
    },
    ModelPricing {
        name: "google/gemini-2.5-pro",
        input_cost_per_mtok: 1.25,
        output_cost_per_mtok: 10.0,
    },
];

/// Strip the `openrouter/` routing prefix some callers put in front of model names.
pub fn strip_routing_prefix(name: &str) -> &str {
    name.strip_prefix("openrouter/").unwrap_or(name)
}

/// Find pricing by longest matching name prefix, so dated variants
/// (`openai/gpt-4.1-2025-04-14`) resolve to their family.
pub fn find_pricing(model: &str) -> Option<&'static ModelPricing> {
    let model = strip_routing_prefix(model);
    PRICING
        .iter()
        .filter(|p| model == p.name || model.starts_with(&format!("{}-", p.name)))
        .max_by_key(|p| p.name.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_prefix_once() {
        assert_eq!(strip_routing_prefix("openrouter/openai/gpt-4.1"), "openai/gpt-4.1");
        assert_eq!(strip_routing_prefix("openai/gpt-4.1"), "openai/gpt-4.1");
    }

    #[test]
    fn dated_names_resolve_to_family() {
        let p = find_pricing("openrouter/openai/gpt-4.1-2025-04-14").unwrap();
        assert_eq!(p.name, "openai/gpt-4.1");
    }

    #[test]
    fn longest_prefix_wins() {
        let p = find_pricing("openai/gpt-4.1-mini-2025-04-14").unwrap();
        assert_eq!(p.name, "openai/gpt-4.1-mini");
    }

    #[test]
    fn unknown_model_has_no_pricing() {
        assert!(find_pricing("meta-llama/llama-3-70b").is_none());
        assert!(find_pricing("openai/gpt-4.10").is_none());
    }

    #[test]
    fn cost_calculation() {
        let p = find_pricing("openai/gpt-4.1").unwrap();
        let cost = p.calculate_cost(1_000_000, 500_000);
        // 1M * 2.0/1M + 500K * 8.0/1M
        assert!((cost - 6.0).abs() < 1e-9, "got {cost}");
    }
}
