//! Common types shared across the crate

use serde::{Deserialize, Serialize};

/// Opaque, comparable user identity.
///
/// Front-ends key conversations by whatever identity they have (a chat id,
/// a numeric account id); the orchestrator never inspects it beyond equality
/// and, when enabled, hashing for abuse tracing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user id from anything string-like
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Raw identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex-encoded SHA-256 of the raw identity.
    ///
    /// Sent to providers in place of the cleartext id when end-user
    /// forwarding is enabled.
    pub fn hashed(&self) -> String {
        use sha2::{Digest, Sha256};
        format!("{:x}", Sha256::digest(self.0.as_bytes()))
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}
