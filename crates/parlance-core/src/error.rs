//! Error types for Parlance

use thiserror::Error;

/// Result type alias for Parlance operations
pub type ParlanceResult<T> = Result<T, ParlanceError>;

/// Main error type for Parlance
#[derive(Error, Debug, Clone)]
pub enum ParlanceError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider rejected the request because of rate limiting (transient)
    #[error("Provider rate limited: {0}")]
    RateLimited(String),

    /// Provider rejected the request as malformed or over its hard limit
    #[error("Invalid request to provider: {0}")]
    InvalidRequest(String),

    /// Any other provider-side failure (transport, parse, 5xx)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Token estimation failed; callers degrade to a conservative estimate
    #[error("Token estimation error: {0}")]
    Estimation(String),

    /// Conversation cannot be compressed any further
    #[error("Cannot compress conversation: {0}")]
    CannotCompress(String),

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Requested capability is not supported by the active provider
    #[error("Unsupported capability: {0}")]
    Unsupported(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ParlanceError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new rate-limited error
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited(message.into())
    }

    /// Create a new invalid-request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a new generic provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    /// Create a new estimation error
    pub fn estimation(message: impl Into<String>) -> Self {
        Self::Estimation(message.into())
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Whether the failure is transient and worth surfacing as "try later"
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

impl From<anyhow::Error> for ParlanceError {
    fn from(error: anyhow::Error) -> Self {
        Self::Provider(error.to_string())
    }
}

impl From<std::io::Error> for ParlanceError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for ParlanceError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

impl From<reqwest::Error> for ParlanceError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}
