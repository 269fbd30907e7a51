use serde::{Deserialize, Serialize};

/// Per-call token usage, raw from the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Run-level totals, incremented once per model call (summaries included).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunAccounting {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_cost_usd: f64,
    pub model_calls: u32,
    pub compactions: u32,
    /// Heuristic size of the conversation measured before the last call.
    pub last_estimate: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

impl RunAccounting {
    /// Incorporate one model call into the totals.
    pub fn record_call(&mut self, usage: TokenUsage, cost_usd: f64) {
        self.total_prompt_tokens += u64::from(usage.prompt_tokens);
        self.total_completion_tokens += u64::from(usage.completion_tokens);
        self.total_cost_usd += cost_usd;
        self.model_calls += 1;
    }
}
