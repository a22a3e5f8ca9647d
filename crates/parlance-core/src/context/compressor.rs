//! Conversation compression
//!
//! Keeps a conversation inside a provider's token budget while preserving as
//! much semantic continuity as the chosen strategy allows. Trimming drops the
//! oldest non-system messages; summarization replaces the middle of the
//! conversation with a condensed synthetic message. The system message at
//! index 0 is never removed or rewritten by either strategy.

use crate::context::config::{CompressionConfig, CompressionStrategy};
use crate::error::{ParlanceError, ParlanceResult};
use crate::llm::adapter::ProviderAdapter;
use crate::llm::messages::{ChatMessage, TokenUsage};
use tracing::{debug, warn};

/// Result of a compression run
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    /// The compressed conversation
    pub messages: Vec<ChatMessage>,
    /// Token usage spent on summarization calls (zero for pure trimming)
    pub usage: TokenUsage,
    /// Whether the conversation ended up within the target
    pub within_budget: bool,
}

/// Decides whether and how to shrink an over-budget conversation
#[derive(Debug, Clone)]
pub struct HistoryCompressor {
    config: CompressionConfig,
}

impl HistoryCompressor {
    /// Create a compressor with the given configuration
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// The active configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Remove the oldest non-system messages until the estimate fits the
    /// trim target (`budget * trim_fraction`).
    ///
    /// Fails with [`ParlanceError::CannotCompress`] when only the system
    /// message remains and the conversation still does not fit; callers must
    /// treat that as unrecoverable for the turn rather than loop.
    pub fn trim(
        &self,
        messages: Vec<ChatMessage>,
        provider: &dyn ProviderAdapter,
    ) -> ParlanceResult<Vec<ChatMessage>> {
        let target = self.config.trim_target();
        let mut messages = messages;

        while provider.count_tokens(&messages) > target {
            if messages.len() <= 1 {
                return Err(ParlanceError::CannotCompress(
                    "conversation has no removable messages left".to_string(),
                ));
            }
            let removable = messages.len() - 1;
            let batch = self.config.trim_batch.max(1).min(removable);
            // Index 0 is the system message and always survives
            messages.drain(1..1 + batch);
        }

        debug!(
            remaining = messages.len(),
            target, "conversation trimmed to fit budget"
        );
        Ok(messages)
    }

    /// Replace everything between the system message and the last
    /// `keep_tail` messages with one synthetic assistant summary.
    ///
    /// Fails with [`ParlanceError::CannotCompress`] when the conversation is
    /// too short to have a summarizable middle; callers fall back to
    /// trimming or surface an error.
    pub async fn summarize(
        &self,
        messages: Vec<ChatMessage>,
        provider: &dyn ProviderAdapter,
    ) -> ParlanceResult<(Vec<ChatMessage>, TokenUsage)> {
        let keep_tail = self.config.keep_tail;
        if messages.len() <= keep_tail + 1 {
            return Err(ParlanceError::CannotCompress(format!(
                "conversation of {} messages has nothing to summarize",
                messages.len()
            )));
        }

        let system = messages[0].clone();
        let middle = &messages[1..messages.len() - keep_tail];
        let tail = &messages[messages.len() - keep_tail..];

        let transcript = middle
            .iter()
            .map(|m| format!("{}: {}", m.role, m.text()))
            .collect::<Vec<_>>()
            .join("\n");

        let (summary, usage) = provider
            .summarize(&transcript, self.config.summary_tokens)
            .await?;

        let mut result = Vec::with_capacity(keep_tail + 2);
        result.push(system);
        result.push(ChatMessage::assistant(format!(
            "<Previous conversation summary: {summary}>"
        )));
        result.extend(tail.iter().cloned());

        debug!(
            summarized = middle.len(),
            kept = keep_tail,
            prompt_tokens = usage.prompt,
            completion_tokens = usage.completion,
            "conversation summarized"
        );
        Ok((result, usage))
    }

    /// Run the configured strategy in a bounded loop until the conversation
    /// fits the budget or `max_passes` is exhausted.
    ///
    /// Summarization output is itself re-measured each pass, so a summary
    /// that comes back too long triggers another pass instead of an endless
    /// loop.
    pub async fn compress(
        &self,
        messages: Vec<ChatMessage>,
        provider: &dyn ProviderAdapter,
    ) -> ParlanceResult<CompressionOutcome> {
        self.compress_with(messages, self.config.strategy, provider)
            .await
    }

    /// Like [`compress`](Self::compress) with an explicit strategy override.
    pub async fn compress_with(
        &self,
        messages: Vec<ChatMessage>,
        strategy: CompressionStrategy,
        provider: &dyn ProviderAdapter,
    ) -> ParlanceResult<CompressionOutcome> {
        let mut messages = messages;
        let mut usage = TokenUsage::default();

        for pass in 0..self.config.max_passes {
            if provider.count_tokens(&messages) <= self.config.max_tokens {
                return Ok(CompressionOutcome {
                    messages,
                    usage,
                    within_budget: true,
                });
            }

            debug!(pass, strategy = ?strategy, "compression pass");
            match strategy {
                CompressionStrategy::Trim => {
                    messages = self.trim(messages, provider)?;
                }
                CompressionStrategy::Summarize => {
                    let (summarized, pass_usage) = self.summarize(messages, provider).await?;
                    messages = summarized;
                    usage += pass_usage;
                }
            }
        }

        let within_budget = provider.count_tokens(&messages) <= self.config.max_tokens;
        if !within_budget {
            warn!(
                passes = self.config.max_passes,
                "compression passes exhausted without fitting budget"
            );
        }
        Ok(CompressionOutcome {
            messages,
            usage,
            within_budget,
        })
    }
}
