//! Provider definitions and model parameters

use serde::{Deserialize, Serialize};

/// Supported LLM providers
///
/// The set is closed on purpose: provider selection is keyed by a
/// configuration string and an unknown key is a configuration error, caught
/// at parse time rather than at first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible API (chat completions, whisper, vision, moderation)
    OpenAi,
    /// YandexGPT API (chat + instruct endpoints)
    Yandex,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Yandex => write!(f, "yandex"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "yandex" | "yandexgpt" | "yagpt" => Ok(ProviderKind::Yandex),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

/// Capability table for a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Chat completion
    pub chat: bool,
    /// Speech-to-text transcription
    pub speech: bool,
    /// Image understanding
    pub vision: bool,
    /// Content moderation endpoint
    pub moderation: bool,
}

/// Model-specific parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Model name/ID
    pub model: String,
    /// Token budget a request's message sequence must fit in
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Transcription model (providers with speech support)
    pub transcription_model: Option<String>,
}

/// Floor for the requested completion length.
///
/// Guards against asking the provider for zero or negative generation room
/// when the prompt estimate is close to the budget.
pub const MIN_COMPLETION_TOKENS: u32 = 50;

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            transcription_model: None,
        }
    }
}

impl ModelParameters {
    /// Create new model parameters with just the model name
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the token budget
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the transcription model
    pub fn with_transcription_model<S: Into<String>>(mut self, model: S) -> Self {
        self.transcription_model = Some(model.into());
        self
    }

    /// Completion-token cap for a request whose prompt is estimated at
    /// `prompt_tokens`, bounded below by [`MIN_COMPLETION_TOKENS`].
    pub fn completion_cap(&self, prompt_tokens: u32) -> u32 {
        self.max_tokens
            .saturating_sub(prompt_tokens)
            .max(MIN_COMPLETION_TOKENS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!(ProviderKind::from_str("openai"), Ok(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::from_str("OpenAI"), Ok(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::from_str("yandex"), Ok(ProviderKind::Yandex));
        assert_eq!(ProviderKind::from_str("yagpt"), Ok(ProviderKind::Yandex));
        assert_eq!(
            ProviderKind::from_str("yandexgpt"),
            Ok(ProviderKind::Yandex)
        );
    }

    #[test]
    fn test_unknown_provider_fails_fast() {
        assert!(ProviderKind::from_str("llama-at-home").is_err());
        assert!(ProviderKind::from_str("").is_err());
    }

    #[test]
    fn test_completion_cap() {
        let params = ModelParameters::new("gpt-4o").with_max_tokens(4000);

        assert_eq!(params.completion_cap(1000), 3000);
        // Prompt at or over budget still requests a small positive amount
        assert_eq!(params.completion_cap(4000), MIN_COMPLETION_TOKENS);
        assert_eq!(params.completion_cap(9999), MIN_COMPLETION_TOKENS);
    }

    #[test]
    fn test_builder() {
        let params = ModelParameters::new("general")
            .with_max_tokens(1500)
            .with_temperature(0.2)
            .with_transcription_model("whisper-1");

        assert_eq!(params.model, "general");
        assert_eq!(params.max_tokens, 1500);
        assert_eq!(params.transcription_model.as_deref(), Some("whisper-1"));
    }
}
