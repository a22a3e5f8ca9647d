//! LLM provider abstraction
//!
//! Message and usage types, the [`ProviderAdapter`] contract, and the
//! concrete vendor adapters behind it.

pub mod adapter;
pub mod messages;
pub mod provider_types;
pub mod providers;

pub use adapter::{create_provider, ProviderAdapter, ProviderInstance};
pub use messages::{ChatMessage, ChatOutcome, MessageContent, MessageRole, TokenUsage};
pub use provider_types::{Capabilities, ModelParameters, ProviderKind, MIN_COMPLETION_TOKENS};
