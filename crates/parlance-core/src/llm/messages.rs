//! Chat message types and structures

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message (instructions / persona)
    System,
    /// User message (human input)
    User,
    /// Assistant message (model response)
    Assistant,
    /// Function message (result of a function the model asked for)
    Function,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Function => write!(f, "function"),
        }
    }
}

/// One part of a structured message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text fragment
    Text {
        /// The text itself
        text: String,
    },
    /// Image reference (data URL or remote URL)
    ImageUrl {
        /// Wrapped URL, matching the OpenAI wire shape
        image_url: ImageUrl,
    },
}

/// URL wrapper for image content parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// The image location (usually a `data:image/...;base64,` URL)
    pub url: String,
}

/// Message body: either plain text or an ordered list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content
    Text(String),
    /// Structured content (text and image parts)
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Extract only the text portion of the content.
    ///
    /// For structured content the first text part wins; image parts are
    /// ignored. Returns an empty string when no text exists.
    pub fn text(&self) -> &str {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts
                .iter()
                .find_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .unwrap_or(""),
        }
    }

    /// Whether any part of the content is an image
    pub fn has_image(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|part| matches!(part, ContentPart::ImageUrl { .. })),
        }
    }

    /// First image URL in the content, if any
    pub fn image_url(&self) -> Option<&str> {
        match self {
            MessageContent::Text(_) => None,
            MessageContent::Parts(parts) => parts.iter().find_map(|part| match part {
                ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
                ContentPart::Text { .. } => None,
            }),
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message
    pub content: MessageContent,
}

impl ChatMessage {
    /// Create a new system message
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::System,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a new user message
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a new assistant message
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a new function message
    pub fn function<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::Function,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message carrying a base64-encoded image and no caption yet
    pub fn user_image<S: AsRef<str>>(image_b64: S) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/jpeg;base64,{}", image_b64.as_ref()),
                },
            }]),
        }
    }

    /// Text-only view of this message (image parts dropped)
    pub fn text(&self) -> &str {
        self.content.text()
    }

    /// Whether this message contains an image part
    pub fn has_image(&self) -> bool {
        self.content.has_image()
    }

    /// Append a text caption to structured content.
    ///
    /// Plain-text messages are left untouched; the caller is expected to gate
    /// this on the pending-image state.
    pub fn attach_caption<S: Into<String>>(&mut self, caption: S) {
        if let MessageContent::Parts(parts) = &mut self.content {
            parts.push(ContentPart::Text {
                text: caption.into(),
            });
        }
    }
}

/// Token usage reported by a provider call
///
/// Usage is additive: nested calls (a summarization inside a chat turn)
/// contribute their own usage to the turn total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub prompt: u64,
    /// Tokens consumed by the completion
    pub completion: u64,
}

impl TokenUsage {
    /// Create a new usage record
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self { prompt, completion }
    }

    /// Total tokens across prompt and completion
    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt: self.prompt + rhs.prompt,
            completion: self.completion + rhs.completion,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        self.prompt += rhs.prompt;
        self.completion += rhs.completion;
    }
}

/// Result of a single provider chat call
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Assistant reply text
    pub content: String,
    /// Token usage of this call
    pub usage: TokenUsage,
}
