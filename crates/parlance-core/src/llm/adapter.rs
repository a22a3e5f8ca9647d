//! Provider adapter trait, enum dispatch, and factory
//!
//! One uniform contract over heterogeneous vendor APIs so the orchestrator
//! never sees vendor-specific request shapes. Concrete adapters live in
//! [`providers`](super::providers); construction goes through
//! [`create_provider`], keyed by [`ProviderKind`].

use crate::config::ProviderConfig;
use crate::context::estimator::TokenCounter;
use crate::error::{ParlanceError, ParlanceResult};
use crate::llm::messages::{ChatMessage, ChatOutcome, TokenUsage};
use crate::llm::provider_types::{Capabilities, ModelParameters, ProviderKind};
use crate::llm::providers::{OpenAiProvider, YandexProvider};
use crate::types::UserId;
use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use tracing::debug;

/// Uniform interface over LLM vendor APIs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Send a chat completion request.
    ///
    /// The requested generation length is bounded by
    /// `max(budget - prompt_estimate, MIN_COMPLETION_TOKENS)`. When hashed
    /// end-user forwarding is enabled, `user` travels as a SHA-256 digest,
    /// never in cleartext.
    async fn chat(&self, messages: &[ChatMessage], user: &UserId) -> ParlanceResult<ChatOutcome>;

    /// Summarize free-form text down to roughly `target_tokens` tokens.
    ///
    /// Used for whole-conversation summaries and oversized file ingestion.
    async fn summarize(
        &self,
        text: &str,
        target_tokens: u32,
    ) -> ParlanceResult<(String, TokenUsage)>;

    /// Describe the image carried by `message`.
    ///
    /// Returns `None` when the provider has no vision support or the message
    /// carries no image.
    async fn describe_image(
        &self,
        message: &ChatMessage,
    ) -> ParlanceResult<Option<(String, TokenUsage)>>;

    /// Transcribe an audio file to text.
    ///
    /// Returns `None` when the provider has no speech support. The file must
    /// already be in a format the vendor accepts; transcoding is the
    /// caller's concern.
    async fn transcribe(&self, audio: &Path) -> ParlanceResult<Option<String>>;

    /// Check a message against the provider's usage policy.
    ///
    /// Returns `true` when the content is allowed. Providers without a
    /// moderation endpoint always allow.
    async fn moderate(&self, message: &ChatMessage) -> ParlanceResult<bool>;

    /// Estimate the token cost of a message sequence under this provider's
    /// model, already degraded to a conservative fallback on estimation
    /// failure.
    fn count_tokens(&self, messages: &[ChatMessage]) -> usize;

    /// Capability table for this adapter
    fn capabilities(&self) -> Capabilities;

    /// Model identifier requests are sent with
    fn model(&self) -> &str;
}

/// Unified provider enum that wraps all adapter implementations
pub enum ProviderInstance {
    /// OpenAI-style adapter
    OpenAi(OpenAiProvider),
    /// Yandex-style adapter
    Yandex(YandexProvider),
}

impl ProviderInstance {
    /// Replace the wrapped adapter's token counter (custom ratio or a real
    /// tokenizer)
    pub fn with_token_counter(self, counter: Box<dyn TokenCounter>) -> Self {
        match self {
            Self::OpenAi(p) => Self::OpenAi(p.with_token_counter(counter)),
            Self::Yandex(p) => Self::Yandex(p.with_token_counter(counter)),
        }
    }
}

#[async_trait]
impl ProviderAdapter for ProviderInstance {
    async fn chat(&self, messages: &[ChatMessage], user: &UserId) -> ParlanceResult<ChatOutcome> {
        match self {
            Self::OpenAi(p) => p.chat(messages, user).await,
            Self::Yandex(p) => p.chat(messages, user).await,
        }
    }

    async fn summarize(
        &self,
        text: &str,
        target_tokens: u32,
    ) -> ParlanceResult<(String, TokenUsage)> {
        match self {
            Self::OpenAi(p) => p.summarize(text, target_tokens).await,
            Self::Yandex(p) => p.summarize(text, target_tokens).await,
        }
    }

    async fn describe_image(
        &self,
        message: &ChatMessage,
    ) -> ParlanceResult<Option<(String, TokenUsage)>> {
        match self {
            Self::OpenAi(p) => p.describe_image(message).await,
            Self::Yandex(p) => p.describe_image(message).await,
        }
    }

    async fn transcribe(&self, audio: &Path) -> ParlanceResult<Option<String>> {
        match self {
            Self::OpenAi(p) => p.transcribe(audio).await,
            Self::Yandex(p) => p.transcribe(audio).await,
        }
    }

    async fn moderate(&self, message: &ChatMessage) -> ParlanceResult<bool> {
        match self {
            Self::OpenAi(p) => p.moderate(message).await,
            Self::Yandex(p) => p.moderate(message).await,
        }
    }

    fn count_tokens(&self, messages: &[ChatMessage]) -> usize {
        match self {
            Self::OpenAi(p) => p.count_tokens(messages),
            Self::Yandex(p) => p.count_tokens(messages),
        }
    }

    fn capabilities(&self) -> Capabilities {
        match self {
            Self::OpenAi(p) => p.capabilities(),
            Self::Yandex(p) => p.capabilities(),
        }
    }

    fn model(&self) -> &str {
        match self {
            Self::OpenAi(p) => p.model(),
            Self::Yandex(p) => p.model(),
        }
    }
}

/// Build a provider adapter for `kind`.
///
/// Fails fast on invalid connection settings; unknown provider keys never
/// reach this point because [`ProviderKind`] parsing rejects them.
pub fn create_provider(
    kind: ProviderKind,
    config: ProviderConfig,
    params: ModelParameters,
) -> ParlanceResult<ProviderInstance> {
    let mut client_builder = Client::builder().timeout(config.request_timeout());

    let mut headers = reqwest::header::HeaderMap::new();
    for (key, value) in &config.headers {
        if let (Ok(name), Ok(val)) = (
            reqwest::header::HeaderName::from_bytes(key.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            headers.insert(name, val);
        }
    }
    if !headers.is_empty() {
        client_builder = client_builder.default_headers(headers);
    }

    let http_client = client_builder
        .build()
        .map_err(|e| ParlanceError::config(format!("failed to create HTTP client: {e}")))?;

    debug!(provider = %kind, model = %params.model, "creating provider adapter");

    Ok(match kind {
        ProviderKind::OpenAi => {
            ProviderInstance::OpenAi(OpenAiProvider::new(config, params, http_client))
        }
        ProviderKind::Yandex => {
            ProviderInstance::Yandex(YandexProvider::new(config, params, http_client))
        }
    })
}
