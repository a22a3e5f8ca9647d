//! Conversation compression configuration

use serde::{Deserialize, Serialize};

/// Strategy for shrinking a conversation that exceeds its token budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    /// Drop oldest non-system messages until under budget
    Trim,
    /// Replace older messages with an LLM-generated summary
    Summarize,
}

impl Default for CompressionStrategy {
    fn default() -> Self {
        Self::Trim
    }
}

/// Configuration for conversation compression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Token budget a conversation must fit in
    pub max_tokens: usize,

    /// Strategy used when the budget is exceeded
    pub strategy: CompressionStrategy,

    /// Trim target as a fraction of the budget.
    ///
    /// Trimming to exactly the budget would re-trigger compression on the
    /// very next turn, so the target sits below 1.0.
    pub trim_fraction: f32,

    /// Messages removed per trim pass
    pub trim_batch: usize,

    /// Most recent messages preserved verbatim by summarization
    pub keep_tail: usize,

    /// Upper bound on compression passes in one turn.
    ///
    /// Summarization can itself produce long text; the loop must not be
    /// unbounded.
    pub max_passes: usize,

    /// Token size requested for conversation summaries
    pub summary_tokens: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            strategy: CompressionStrategy::default(),
            trim_fraction: 0.8,
            trim_batch: 1,
            keep_tail: 2,
            max_passes: 4,
            summary_tokens: 240,
        }
    }
}

impl CompressionConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token budget
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the strategy
    pub fn with_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the trim fraction
    pub fn with_trim_fraction(mut self, fraction: f32) -> Self {
        self.trim_fraction = fraction;
        self
    }

    /// Set the number of tail messages summarization preserves
    pub fn with_keep_tail(mut self, keep_tail: usize) -> Self {
        self.keep_tail = keep_tail;
        self
    }

    /// Token count trimming aims for
    pub fn trim_target(&self) -> usize {
        let target = self.max_tokens as f32 * self.trim_fraction;
        if target.is_finite() && target >= 0.0 {
            target as usize
        } else {
            0
        }
    }
}
