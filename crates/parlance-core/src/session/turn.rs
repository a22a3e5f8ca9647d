//! Turn results and user-facing fallback replies

use crate::llm::messages::TokenUsage;

/// Reply shown when the provider is rate limiting requests
pub const RATE_LIMITED_REPLY: &str =
    "The service is getting rate limited. Please try again later.";

/// Reply shown for any other provider-side failure
pub const FAILURE_REPLY: &str = "Sorry, something went wrong. Please try again later.";

/// Reply shown when a message is rejected by content moderation
pub const MODERATION_REFUSAL: &str = "Sorry, I can't help with that.";

/// How a chat turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The provider answered and the conversation advanced
    Completed,
    /// The turn failed; the conversation was restored to its prior state
    Failed,
}

/// Result of one chat turn, always carrying something displayable
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Assistant reply, or a fallback message on failure
    pub response: String,
    /// Tokens spent on this turn, including compression and retries
    pub usage: TokenUsage,
    /// Whether the conversation advanced
    pub status: TurnStatus,
    /// Transcription of the user's audio, for voice turns
    pub transcript: Option<String>,
}

impl TurnOutcome {
    /// A successful turn
    pub fn completed(response: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            response: response.into(),
            usage,
            status: TurnStatus::Completed,
            transcript: None,
        }
    }

    /// A failed turn with a user-facing fallback reply
    pub fn failed(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            usage: TokenUsage::default(),
            status: TurnStatus::Failed,
            transcript: None,
        }
    }

    /// Attach the voice transcript to this outcome
    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    /// Whether the conversation advanced
    pub fn is_completed(&self) -> bool {
        self.status == TurnStatus::Completed
    }
}
