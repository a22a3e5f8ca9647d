//! OpenAI-style provider adapter

use crate::config::ProviderConfig;
use crate::context::estimator::{TokenCounter, TokenEstimator};
use crate::error::{ParlanceError, ParlanceResult};
use crate::llm::adapter::ProviderAdapter;
use crate::llm::messages::{ChatMessage, ChatOutcome, ContentPart, ImageUrl, MessageContent, MessageRole, TokenUsage};
use crate::llm::provider_types::Capabilities;
use crate::llm::providers::error_utils::{handle_http_error, handle_parse_error};
use crate::llm::ModelParameters;
use crate::types::UserId;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Completion cap for image descriptions
const DESCRIBE_IMAGE_MAX_TOKENS: u32 = 400;

/// OpenAI provider adapter
pub struct OpenAiProvider {
    config: ProviderConfig,
    params: ModelParameters,
    http_client: Client,
    counter: Box<dyn TokenCounter>,
}

impl OpenAiProvider {
    /// Create a new OpenAI adapter
    pub fn new(config: ProviderConfig, params: ModelParameters, http_client: Client) -> Self {
        Self {
            config,
            params,
            http_client,
            counter: Box::new(TokenEstimator::for_provider("openai")),
        }
    }

    /// Replace the token counter (custom ratio or a real tokenizer)
    pub fn with_token_counter(mut self, counter: Box<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request;
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }
        if let Some(org) = &self.config.organization {
            request = request.header("OpenAI-Organization", org);
        }
        request
    }

    async fn completion_request(&self, body: Value) -> ParlanceResult<Value> {
        let url = format!("{}/chat/completions", self.base_url());
        let response = self
            .authorized(self.http_client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| ParlanceError::provider(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(handle_http_error(response, "OpenAI").await);
        }

        response
            .json()
            .await
            .map_err(|e| handle_parse_error(e, "OpenAI"))
    }

    fn parse_completion(response: &Value) -> ParlanceResult<ChatOutcome> {
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ParlanceError::provider("OpenAI response missing choices[0].message.content")
            })?
            .to_string();

        Ok(ChatOutcome {
            content,
            usage: Self::parse_usage(response),
        })
    }

    fn parse_usage(response: &Value) -> TokenUsage {
        TokenUsage {
            prompt: response["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion: response["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    async fn chat(&self, messages: &[ChatMessage], user: &UserId) -> ParlanceResult<ChatOutcome> {
        let prompt_estimate = self.count_tokens(messages) as u32;
        let mut body = json!({
            "model": self.params.model,
            "temperature": self.params.temperature,
            "max_tokens": self.params.completion_cap(prompt_estimate),
            "messages": messages,
        });
        if self.config.hash_end_user_id {
            body["user"] = json!(user.hashed());
        }

        let response = self.completion_request(body).await?;
        let outcome = Self::parse_completion(&response)?;
        debug!(
            model = %self.params.model,
            prompt_tokens = outcome.usage.prompt,
            completion_tokens = outcome.usage.completion,
            "OpenAI chat completion"
        );
        Ok(outcome)
    }

    async fn summarize(
        &self,
        text: &str,
        target_tokens: u32,
    ) -> ParlanceResult<(String, TokenUsage)> {
        let sentences = (target_tokens / 30).max(1);
        let body = json!({
            "model": self.params.model,
            "temperature": self.params.temperature,
            "max_tokens": target_tokens.min(self.params.max_tokens),
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "You are very good at summarizing text to fit in {sentences} sentences. \
                         Answer with the summary only."
                    )
                },
                { "role": "user", "content": format!("Make a summary:\n{text}") }
            ],
        });

        let response = self.completion_request(body).await?;
        let outcome = Self::parse_completion(&response)?;
        Ok((outcome.content, outcome.usage))
    }

    async fn describe_image(
        &self,
        message: &ChatMessage,
    ) -> ParlanceResult<Option<(String, TokenUsage)>> {
        if !self.config.vision {
            return Ok(None);
        }
        let Some(image_url) = message.content.image_url() else {
            return Ok(None);
        };

        let request_message = ChatMessage {
            role: MessageRole::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "Describe the given image, answer with the description only."
                        .to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.to_string(),
                    },
                },
            ]),
        };
        let body = json!({
            "model": self.params.model,
            "temperature": self.params.temperature,
            "max_tokens": DESCRIBE_IMAGE_MAX_TOKENS,
            "messages": [request_message],
        });

        let response = self.completion_request(body).await?;
        let outcome = Self::parse_completion(&response)?;
        debug!(description = %outcome.content, "image described");
        Ok(Some((outcome.content, outcome.usage)))
    }

    async fn transcribe(&self, audio: &Path) -> ParlanceResult<Option<String>> {
        let Some(model) = &self.params.transcription_model else {
            return Ok(None);
        };

        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());
        let form = reqwest::multipart::Form::new()
            .text("model", model.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let url = format!("{}/audio/transcriptions", self.base_url());
        let response = self
            .authorized(self.http_client.post(&url).multipart(form))
            .send()
            .await
            .map_err(|e| ParlanceError::provider(format!("OpenAI transcription failed: {e}")))?;

        if !response.status().is_success() {
            return Err(handle_http_error(response, "OpenAI").await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| handle_parse_error(e, "OpenAI"))?;
        let text = body["text"]
            .as_str()
            .ok_or_else(|| ParlanceError::provider("OpenAI transcription missing text field"))?;
        Ok(Some(text.to_string()))
    }

    async fn moderate(&self, message: &ChatMessage) -> ParlanceResult<bool> {
        if !self.config.moderation {
            return Ok(true);
        }

        let url = format!("{}/moderations", self.base_url());
        let body = json!({ "input": [message.text()] });
        let response = self
            .authorized(self.http_client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| ParlanceError::provider(format!("OpenAI moderation failed: {e}")))?;

        if !response.status().is_success() {
            return Err(handle_http_error(response, "OpenAI").await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| handle_parse_error(e, "OpenAI"))?;
        let flagged = body["results"][0]["flagged"].as_bool().unwrap_or(false);
        if flagged {
            warn!("message flagged by moderation");
        }
        Ok(!flagged)
    }

    fn count_tokens(&self, messages: &[ChatMessage]) -> usize {
        self.counter
            .count(messages, &self.params.model)
            .unwrap_or(self.params.max_tokens as usize / 2)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            chat: true,
            speech: self.params.transcription_model.is_some(),
            vision: self.config.vision,
            moderation: self.config.moderation,
        }
    }

    fn model(&self) -> &str {
        &self.params.model
    }
}
