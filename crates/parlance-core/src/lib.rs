//! Parlance core: chat-session orchestration over LLM providers
//!
//! Parlance keeps multi-user chat conversations inside a provider's context
//! budget and behind a uniform provider interface. The pieces:
//!
//! - [`session`]: the per-user turn lifecycle (moderate, compress, complete,
//!   persist, account)
//! - [`llm`]: message types, the [`ProviderAdapter`](llm::ProviderAdapter)
//!   contract, and the OpenAI and Yandex adapters behind it
//! - [`context`]: token estimation and history compression
//! - [`storage`]: conversation stores and the usage ledger
//! - [`config`]: TOML + environment configuration
//!
//! ```no_run
//! use parlance_core::config::ParlanceConfig;
//! use parlance_core::session::ChatSession;
//! use parlance_core::types::UserId;
//!
//! # async fn demo() -> parlance_core::error::ParlanceResult<()> {
//! let session = ChatSession::new(ParlanceConfig::load("parlance.toml")?)?;
//! let outcome = session.chat(&UserId::from(42), "Hello there").await?;
//! println!("{}", outcome.response);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod session;
pub mod storage;
pub mod types;

pub use config::ParlanceConfig;
pub use error::{ParlanceError, ParlanceResult};
pub use llm::{ChatMessage, MessageRole, ProviderAdapter, ProviderKind, TokenUsage};
pub use session::{ChatSession, TurnOutcome, TurnStatus};
pub use storage::{ConversationStore, UsageLedger};
pub use types::UserId;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
