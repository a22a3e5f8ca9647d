//! Configuration for the orchestrator and providers
//!
//! Values are plain serde structs loadable from a TOML file with environment
//! overrides (`PARLANCE_*`). The mechanism is intentionally thin: the core
//! consumes values, not a configuration framework.

use crate::context::config::CompressionConfig;
use crate::error::{ParlanceError, ParlanceResult};
use crate::llm::provider_types::ModelParameters;
use crate::storage::usage::Pricing;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default request timeout for provider calls, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Provider-specific connection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key for authentication
    pub api_key: Option<String>,
    /// API endpoint base URL (overrides the provider default)
    pub base_url: Option<String>,
    /// Organization ID (OpenAI billing/access control)
    pub organization: Option<String>,
    /// Catalog/folder ID (Yandex)
    pub folder_id: Option<String>,
    /// Custom HTTP headers to include in requests
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Forward a hashed end-user identifier for abuse tracing
    #[serde(default)]
    pub hash_end_user_id: bool,
    /// Enable image understanding (when the provider supports it)
    #[serde(default)]
    pub vision: bool,
    /// Enable content moderation of incoming messages
    #[serde(default)]
    pub moderation: bool,
}

impl ProviderConfig {
    /// Create an empty config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Enable hashed end-user forwarding
    pub fn with_hashed_end_user(mut self, enabled: bool) -> Self {
        self.hash_end_user_id = enabled;
        self
    }

    /// Effective request timeout
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

/// File-ingestion limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIngestConfig {
    /// Hard cap on accepted file text length, in characters
    pub max_chars: usize,
    /// Token size requested for per-chunk summaries
    pub summary_tokens: u32,
    /// Maximum recursive summarization depth before hard truncation
    pub max_depth: usize,
}

impl Default for FileIngestConfig {
    fn default() -> Self {
        Self {
            max_chars: 10_000,
            summary_tokens: 1000,
            max_depth: 3,
        }
    }
}

/// Top-level configuration consumed by [`ChatSession`](crate::session::ChatSession)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParlanceConfig {
    /// Provider selection key (parsed into a `ProviderKind`, unknown keys fail)
    pub provider: String,
    /// Provider connection settings
    #[serde(default)]
    pub provider_config: ProviderConfig,
    /// Model parameters
    #[serde(default)]
    pub model: ModelParameters,
    /// Conversation compression settings
    #[serde(default)]
    pub compression: CompressionConfig,
    /// System message every new conversation starts with
    pub system_prompt: String,
    /// Characters-per-token override for the token estimator.
    ///
    /// Unset keeps the provider-tuned default ratio.
    #[serde(default)]
    pub chars_per_token: Option<f32>,
    /// Unit prices for cost reporting
    #[serde(default)]
    pub pricing: Pricing,
    /// Directory for file-backed stores; `None` selects in-memory storage
    pub storage_root: Option<PathBuf>,
    /// File ingestion limits
    #[serde(default)]
    pub file_ingest: FileIngestConfig,
}

impl Default for ParlanceConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            provider_config: ProviderConfig::default(),
            model: ModelParameters::default(),
            compression: CompressionConfig::default(),
            system_prompt: "You are a helpful assistant.".to_string(),
            chars_per_token: None,
            pricing: Pricing::default(),
            storage_root: None,
            file_ingest: FileIngestConfig::default(),
        }
    }
}

impl ParlanceConfig {
    /// Load configuration from a TOML file, with `PARLANCE_*` environment
    /// variables overriding file values (`PARLANCE_PROVIDER`,
    /// `PARLANCE_MODEL__MODEL`, ...).
    pub fn load(path: impl AsRef<Path>) -> ParlanceResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("PARLANCE").separator("__"))
            .build()
            .map_err(|e| ParlanceError::config(format!("failed to load config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| ParlanceError::config(format!("invalid config: {e}")))
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> ParlanceResult<()> {
        use std::str::FromStr;

        crate::llm::provider_types::ProviderKind::from_str(&self.provider)
            .map_err(ParlanceError::Config)?;

        if self.system_prompt.trim().is_empty() {
            return Err(ParlanceError::config("system_prompt must not be empty"));
        }
        if !(self.compression.trim_fraction > 0.0 && self.compression.trim_fraction <= 1.0) {
            return Err(ParlanceError::config(
                "compression.trim_fraction must be in (0, 1]",
            ));
        }
        if let Some(ratio) = self.chars_per_token {
            if ratio <= 0.0 {
                return Err(ParlanceError::config("chars_per_token must be positive"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(ParlanceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = ParlanceConfig {
            provider: "frontier-9000".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_trim_fraction_rejected() {
        let mut config = ParlanceConfig::default();
        config.compression.trim_fraction = 0.0;
        assert!(config.validate().is_err());

        config.compression.trim_fraction = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_chars_per_token_rejected() {
        let config = ParlanceConfig {
            chars_per_token: Some(0.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parlance.toml");
        std::fs::write(
            &path,
            r#"
provider = "yandex"
system_prompt = "You are a knightly assistant."
chars_per_token = 2.5

[model]
model = "general"
max_tokens = 1500
temperature = 0.6

[compression]
max_tokens = 1500
strategy = "summarize"
trim_fraction = 0.8
trim_batch = 1
keep_tail = 2
max_passes = 4
summary_tokens = 240
"#,
        )
        .unwrap();

        let config = ParlanceConfig::load(&path).unwrap();
        assert_eq!(config.provider, "yandex");
        assert_eq!(config.model.max_tokens, 1500);
        assert_eq!(config.chars_per_token, Some(2.5));
        assert_eq!(
            config.compression.strategy,
            crate::context::config::CompressionStrategy::Summarize
        );
        assert!(config.validate().is_ok());
    }
}
