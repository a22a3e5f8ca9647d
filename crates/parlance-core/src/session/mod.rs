//! Session orchestration
//!
//! The [`ChatSession`] ties the provider layer, compression, and storage
//! into the per-user turn lifecycle.

pub mod session;
pub mod turn;

pub use session::{ChatSession, UsageReport};
pub use turn::{TurnOutcome, TurnStatus, FAILURE_REPLY, MODERATION_REFUSAL, RATE_LIMITED_REPLY};
