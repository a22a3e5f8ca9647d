//! Conversation-length management
//!
//! Token estimation and history compression keep long conversations inside
//! a provider's context budget.

pub mod compressor;
pub mod config;
pub mod estimator;

pub use compressor::{CompressionOutcome, HistoryCompressor};
pub use config::{CompressionConfig, CompressionStrategy};
pub use estimator::{TokenCounter, TokenEstimator};
