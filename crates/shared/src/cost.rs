/// Price per 1,000 tokens assumed when estimating a classification run.
pub const DEFAULT_RATE_PER_1K_TOKENS: f64 = 0.02;

/// Rough token count per post, prompt overhead included.
pub const DEFAULT_TOKENS_PER_ITEM: u64 = 50;

/// Heuristic pricing for a classification pass. Only used to ask for
/// confirmation; nothing enforces it as a cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub rate_per_1k_tokens: f64,
    pub tokens_per_item: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            rate_per_1k_tokens: DEFAULT_RATE_PER_1K_TOKENS,
            tokens_per_item: DEFAULT_TOKENS_PER_ITEM,
        }
    }
}

impl CostModel {
    pub fn estimate(&self, count: usize) -> f64 {
        estimate_cost(count, self.rate_per_1k_tokens, self.tokens_per_item)
    }
}

/// `(count * tokens_per_item / 1000) * rate_per_1k_tokens`
pub fn estimate_cost(count: usize, rate_per_1k_tokens: f64, tokens_per_item: u64) -> f64 {
    let total_tokens = count as f64 * tokens_per_item as f64;
    (total_tokens / 1000.0) * rate_per_1k_tokens
}

/// Estimate with the default rate and token heuristic.
pub fn estimate_cost_default(count: usize) -> f64 {
    CostModel::default().estimate(count)
}
