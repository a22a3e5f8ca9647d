//! Token estimation for chat messages
//!
//! Exact tokenization varies by provider, so the shipped estimator uses a
//! characters-per-token approximation with a per-message overhead. The ratio
//! is a tunable constant, not a guaranteed property of any tokenizer.

use crate::error::ParlanceResult;
use crate::llm::messages::ChatMessage;

/// Pluggable token counter for a model family.
///
/// The trait is fallible so that real tokenizers (which can reject unknown
/// models) can be plugged in. Callers must treat a failure as non-fatal and
/// substitute a conservative estimate instead of aborting the turn.
#[cfg_attr(test, mockall::automock)]
pub trait TokenCounter: Send + Sync {
    /// Estimate the token cost of a message sequence for `model`.
    ///
    /// Structured content counts only its text parts; image parts contribute
    /// zero tokens (a known simplification).
    fn count(&self, messages: &[ChatMessage], model: &str) -> ParlanceResult<usize>;

    /// Estimate the token cost of a bare string for `model`.
    fn count_text(&self, text: &str, model: &str) -> ParlanceResult<usize>;
}

/// Heuristic token estimator
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    /// Characters per token (average)
    chars_per_token: f32,
    /// Overhead tokens per message (role, formatting)
    message_overhead: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    /// Create a new estimator with default settings
    pub fn new() -> Self {
        Self {
            chars_per_token: 4.0, // Common approximation for English text
            message_overhead: 4,  // Role token + formatting
        }
    }

    /// Create an estimator with a custom characters-per-token ratio
    pub fn with_chars_per_token(mut self, chars_per_token: f32) -> Self {
        self.chars_per_token = chars_per_token;
        self
    }

    /// Create an estimator tuned for a specific provider
    pub fn for_provider(provider: &str) -> Self {
        match provider.to_lowercase().as_str() {
            "openai" => Self {
                chars_per_token: 4.0,
                message_overhead: 4,
            },
            // Cyrillic text runs closer to two characters per token
            "yandex" => Self {
                chars_per_token: 2.5,
                message_overhead: 4,
            },
            _ => Self::default(),
        }
    }

    /// Characters-per-token ratio in use
    pub fn chars_per_token(&self) -> f32 {
        self.chars_per_token
    }

    fn estimate_str(&self, text: &str) -> usize {
        (text.len() as f32 / self.chars_per_token).ceil() as usize
    }

    fn estimate_message(&self, message: &ChatMessage) -> usize {
        // Images are deliberately not counted here; the estimate covers the
        // textual budget only.
        self.estimate_str(message.text()) + self.message_overhead
    }
}

impl TokenCounter for TokenEstimator {
    fn count(&self, messages: &[ChatMessage], _model: &str) -> ParlanceResult<usize> {
        Ok(messages.iter().map(|m| self.estimate_message(m)).sum())
    }

    fn count_text(&self, text: &str, _model: &str) -> ParlanceResult<usize> {
        Ok(self.estimate_str(text))
    }
}
