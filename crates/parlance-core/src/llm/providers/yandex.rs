//! YandexGPT provider adapter
//!
//! The Yandex API differs from the OpenAI shape in two ways that matter
//! here: the system message travels as a separate `instructionText` field
//! (and must be stripped from the message list), and the assistant role is
//! rendered in the vendor's own naming.

use crate::config::ProviderConfig;
use crate::context::estimator::{TokenCounter, TokenEstimator};
use crate::error::{ParlanceError, ParlanceResult};
use crate::llm::adapter::ProviderAdapter;
use crate::llm::messages::{ChatMessage, ChatOutcome, MessageRole, TokenUsage};
use crate::llm::provider_types::Capabilities;
use crate::llm::providers::error_utils::{handle_http_error, handle_parse_error};
use crate::llm::ModelParameters;
use crate::types::UserId;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

const DEFAULT_CHAT_URL: &str = "https://llm.api.cloud.yandex.net/llm/v1alpha/chat";
const DEFAULT_INSTRUCT_URL: &str = "https://llm.api.cloud.yandex.net/llm/v1alpha/instruct";

/// Role name the Yandex API uses for assistant messages
const ASSISTANT_ROLE: &str = "Ассистент";

/// Yandex provider adapter
pub struct YandexProvider {
    config: ProviderConfig,
    params: ModelParameters,
    http_client: Client,
    counter: Box<dyn TokenCounter>,
}

impl YandexProvider {
    /// Create a new Yandex adapter
    pub fn new(config: ProviderConfig, params: ModelParameters, http_client: Client) -> Self {
        Self {
            config,
            params,
            http_client,
            counter: Box::new(TokenEstimator::for_provider("yandex")),
        }
    }

    /// Replace the token counter (custom ratio or a real tokenizer)
    pub fn with_token_counter(mut self, counter: Box<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    fn chat_url(&self) -> String {
        self.config
            .base_url
            .as_deref()
            .map(|base| format!("{}/chat", base.trim_end_matches('/')))
            .unwrap_or_else(|| DEFAULT_CHAT_URL.to_string())
    }

    fn instruct_url(&self) -> String {
        self.config
            .base_url
            .as_deref()
            .map(|base| format!("{}/instruct", base.trim_end_matches('/')))
            .unwrap_or_else(|| DEFAULT_INSTRUCT_URL.to_string())
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request;
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Api-Key {api_key}"));
        }
        if let Some(folder) = &self.config.folder_id {
            request = request.header("x-folder-id", folder);
        }
        request
    }

    /// Convert messages into the Yandex wire format.
    ///
    /// The system message is dropped (it travels as `instructionText`), and
    /// image parts are reduced to their text captions.
    fn format_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| {
                let role = match m.role {
                    MessageRole::Assistant => ASSISTANT_ROLE.to_string(),
                    other => other.to_string(),
                };
                json!({ "role": role, "text": m.text() })
            })
            .collect()
    }

    /// Instruction text for a conversation: the leading system message, or
    /// an empty string when the conversation has none.
    fn instruction_text(messages: &[ChatMessage]) -> &str {
        messages
            .first()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.text())
            .unwrap_or("")
    }

    fn generation_options(&self, max_tokens: u32) -> Value {
        json!({
            "partialResults": false,
            "temperature": self.params.temperature,
            "maxTokens": max_tokens,
        })
    }
}

#[async_trait]
impl ProviderAdapter for YandexProvider {
    async fn chat(&self, messages: &[ChatMessage], _user: &UserId) -> ParlanceResult<ChatOutcome> {
        let prompt_estimate = self.count_tokens(messages) as u32;
        let body = json!({
            "model": self.params.model,
            "generationOptions": self.generation_options(self.params.completion_cap(prompt_estimate)),
            "messages": Self::format_messages(messages),
            "instructionText": Self::instruction_text(messages),
        });

        let response = self
            .authorized(self.http_client.post(self.chat_url()).json(&body))
            .send()
            .await
            .map_err(|e| ParlanceError::provider(format!("Yandex request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(handle_http_error(response, "Yandex").await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| handle_parse_error(e, "Yandex"))?;

        let result = &body["result"];
        let content = result["message"]["text"]
            .as_str()
            .ok_or_else(|| ParlanceError::provider("Yandex response missing result.message.text"))?
            .to_string();
        // The chat endpoint reports a single token figure for the reply
        let completion = result["num_tokens"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| result["num_tokens"].as_u64())
            .unwrap_or(0);

        debug!(model = %self.params.model, completion_tokens = completion, "Yandex chat completion");
        Ok(ChatOutcome {
            content,
            usage: TokenUsage::new(0, completion),
        })
    }

    async fn summarize(
        &self,
        text: &str,
        target_tokens: u32,
    ) -> ParlanceResult<(String, TokenUsage)> {
        let sentences = (target_tokens / 30).max(1);
        let body = json!({
            "model": self.params.model,
            "generationOptions": self.generation_options(target_tokens),
            "instructionText": format!(
                "You are very good at summarizing text to fit in {sentences} sentences. \
                 Answer with the summary only."
            ),
            "requestText": format!("Make a summary:\n{text}"),
        });

        let response = self
            .authorized(self.http_client.post(self.instruct_url()).json(&body))
            .send()
            .await
            .map_err(|e| ParlanceError::provider(format!("Yandex summary failed: {e}")))?;

        if !response.status().is_success() {
            return Err(handle_http_error(response, "Yandex").await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| handle_parse_error(e, "Yandex"))?;

        let alternative = &body["alternatives"][0];
        let summary = alternative["text"]
            .as_str()
            .ok_or_else(|| ParlanceError::provider("Yandex response missing alternatives[0].text"))?
            .to_string();
        let usage = TokenUsage {
            prompt: body["numPromptTokens"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| body["numPromptTokens"].as_u64())
                .unwrap_or(0),
            completion: alternative["numTokens"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| alternative["numTokens"].as_u64())
                .unwrap_or(0),
        };
        Ok((summary, usage))
    }

    async fn describe_image(
        &self,
        _message: &ChatMessage,
    ) -> ParlanceResult<Option<(String, TokenUsage)>> {
        // No vision support
        Ok(None)
    }

    async fn transcribe(&self, _audio: &Path) -> ParlanceResult<Option<String>> {
        // No speech support
        Ok(None)
    }

    async fn moderate(&self, _message: &ChatMessage) -> ParlanceResult<bool> {
        Ok(true)
    }

    fn count_tokens(&self, messages: &[ChatMessage]) -> usize {
        self.counter
            .count(messages, &self.params.model)
            .unwrap_or(self.params.max_tokens as usize / 2)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            chat: true,
            speech: false,
            vision: false,
            moderation: false,
        }
    }

    fn model(&self) -> &str {
        &self.params.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_messages_strips_system_and_renames_assistant() {
        let messages = vec![
            ChatMessage::system("Be a knight."),
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Greetings, traveller."),
        ];

        let formatted = YandexProvider::format_messages(&messages);
        assert_eq!(formatted.len(), 2);
        assert_eq!(formatted[0]["role"], "user");
        assert_eq!(formatted[0]["text"], "Hello");
        assert_eq!(formatted[1]["role"], ASSISTANT_ROLE);
    }

    #[test]
    fn test_instruction_text() {
        let messages = vec![ChatMessage::system("Be brief."), ChatMessage::user("Hi")];
        assert_eq!(YandexProvider::instruction_text(&messages), "Be brief.");

        let no_system = vec![ChatMessage::user("Hi")];
        assert_eq!(YandexProvider::instruction_text(&no_system), "");
    }

    #[test]
    fn test_custom_base_url() {
        let mut config = ProviderConfig::default();
        config.base_url = Some("https://example.test/llm/".to_string());
        let p = YandexProvider::new(config, ModelParameters::new("general"), Client::new());
        assert_eq!(p.chat_url(), "https://example.test/llm/chat");
        assert_eq!(p.instruct_url(), "https://example.test/llm/instruct");
    }

    #[test]
    fn test_count_tokens_degrades_when_counter_fails() {
        use crate::context::estimator::MockTokenCounter;

        let mut counter = MockTokenCounter::new();
        counter
            .expect_count()
            .returning(|_, _| Err(ParlanceError::estimation("unknown model")));

        let p = YandexProvider::new(
            ProviderConfig::default(),
            ModelParameters::new("general").with_max_tokens(1500),
            Client::new(),
        )
        .with_token_counter(Box::new(counter));
        assert_eq!(p.count_tokens(&[ChatMessage::user("привет")]), 750);
    }

    #[tokio::test]
    async fn test_unsupported_capabilities_return_none() {
        let p = YandexProvider::new(
            ProviderConfig::default(),
            ModelParameters::new("general"),
            Client::new(),
        );
        assert!(p
            .describe_image(&ChatMessage::user_image("abc"))
            .await
            .unwrap()
            .is_none());
        assert!(p
            .transcribe(Path::new("/tmp/a.wav"))
            .await
            .unwrap()
            .is_none());
        assert!(p.moderate(&ChatMessage::user("x")).await.unwrap());
    }
}
