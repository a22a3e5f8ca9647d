//! Usage accounting
//!
//! Monotonic per-user counters (messages, tokens, voice seconds, images)
//! with monetary cost derived at read time from the configured unit prices.
//! Changing prices retroactively changes the reported cost of old usage;
//! only the counters are stored.

use crate::error::{ParlanceError, ParlanceResult};
use crate::llm::messages::TokenUsage;
use crate::storage::sanitize_component;
use crate::types::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

/// Unit prices used to derive cost from counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pricing {
    /// Price per 1000 prompt tokens
    #[serde(default)]
    pub prompt_per_1k: f64,
    /// Price per 1000 completion tokens
    #[serde(default)]
    pub completion_per_1k: f64,
    /// Price per second of transcribed audio
    #[serde(default)]
    pub per_voice_second: f64,
    /// Price per generated or described image
    #[serde(default)]
    pub per_image: f64,
}

/// Accumulated usage counters for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Completed chat turns
    #[serde(default)]
    pub messages_sent: u64,
    /// Prompt tokens billed by providers
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Completion tokens billed by providers
    #[serde(default)]
    pub completion_tokens: u64,
    /// Seconds of audio transcribed
    #[serde(default)]
    pub voice_seconds: u64,
    /// Images described or processed
    #[serde(default)]
    pub images: u64,
}

impl UsageRecord {
    /// Total tokens across prompt and completion
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Monetary cost of these counters under `pricing`
    pub fn cost(&self, pricing: &Pricing) -> f64 {
        self.prompt_tokens as f64 / 1000.0 * pricing.prompt_per_1k
            + self.completion_tokens as f64 / 1000.0 * pricing.completion_per_1k
            + self.voice_seconds as f64 * pricing.per_voice_second
            + self.images as f64 * pricing.per_image
    }

    fn apply(&mut self, delta: &UsageDelta) {
        self.messages_sent += delta.messages_sent;
        self.prompt_tokens += delta.tokens.prompt;
        self.completion_tokens += delta.tokens.completion;
        self.voice_seconds += delta.voice_seconds;
        self.images += delta.images;
    }
}

/// One increment applied to a user's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageDelta {
    /// Chat turns completed in this increment
    pub messages_sent: u64,
    /// Tokens billed in this increment
    pub tokens: TokenUsage,
    /// Seconds of audio transcribed in this increment
    pub voice_seconds: u64,
    /// Images processed in this increment
    pub images: u64,
}

impl UsageDelta {
    /// Delta for one completed chat turn
    pub fn turn(tokens: TokenUsage) -> Self {
        Self {
            messages_sent: 1,
            tokens,
            ..Default::default()
        }
    }

    /// Delta for a summarization or other auxiliary token spend
    pub fn tokens(tokens: TokenUsage) -> Self {
        Self {
            tokens,
            ..Default::default()
        }
    }

    /// Record transcribed audio on top of this delta
    pub fn with_voice_seconds(mut self, seconds: u64) -> Self {
        self.voice_seconds = seconds;
        self
    }

    /// Record processed images on top of this delta
    pub fn with_images(mut self, images: u64) -> Self {
        self.images = images;
        self
    }
}

/// Per-user usage counter store
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Atomically add `delta` to the user's counters
    async fn increment(&self, user: &UserId, delta: UsageDelta) -> ParlanceResult<()>;

    /// Current counters for the user, if any usage was ever recorded
    async fn get(&self, user: &UserId) -> ParlanceResult<Option<UsageRecord>>;
}

/// In-memory ledger (tests and ephemeral deployments)
#[derive(Default)]
pub struct MemoryUsageLedger {
    records: RwLock<HashMap<UserId, UsageRecord>>,
}

impl MemoryUsageLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageLedger for MemoryUsageLedger {
    async fn increment(&self, user: &UserId, delta: UsageDelta) -> ParlanceResult<()> {
        self.records
            .write()
            .await
            .entry(user.clone())
            .or_default()
            .apply(&delta);
        Ok(())
    }

    async fn get(&self, user: &UserId) -> ParlanceResult<Option<UsageRecord>> {
        Ok(self.records.read().await.get(user).cloned())
    }
}

/// File-backed ledger storing one JSON record per user under
/// `<base>/usage/<user>.json`
pub struct FileUsageLedger {
    base_path: PathBuf,
    // Serializes read-modify-write cycles on the record files
    write_lock: RwLock<()>,
}

impl FileUsageLedger {
    /// Create a ledger rooted at `base_path`
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: RwLock::new(()),
        }
    }

    fn record_path(&self, user: &UserId) -> PathBuf {
        self.base_path
            .join("usage")
            .join(format!("{}.json", sanitize_component(user.as_str())))
    }

    async fn read_record(path: &Path) -> ParlanceResult<Option<UsageRecord>> {
        match fs::read_to_string(path).await {
            Ok(json) => {
                let record = serde_json::from_str(&json).map_err(|e| {
                    ParlanceError::storage(format!("failed to deserialize {path:?}: {e}"))
                })?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ParlanceError::storage(format!(
                "failed to read {path:?}: {e}"
            ))),
        }
    }
}

#[async_trait]
impl UsageLedger for FileUsageLedger {
    async fn increment(&self, user: &UserId, delta: UsageDelta) -> ParlanceResult<()> {
        let _guard = self.write_lock.write().await;
        let path = self.record_path(user);

        let mut record = Self::read_record(&path).await?.unwrap_or_default();
        record.apply(&delta);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ParlanceError::storage(format!("failed to create {parent:?}: {e}")))?;
        }
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| ParlanceError::storage(format!("failed to serialize usage: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| ParlanceError::storage(format!("failed to write {tmp:?}: {e}")))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| ParlanceError::storage(format!("failed to commit {path:?}: {e}")))?;
        Ok(())
    }

    async fn get(&self, user: &UserId) -> ParlanceResult<Option<UsageRecord>> {
        Self::read_record(&self.record_path(user)).await
    }
}
