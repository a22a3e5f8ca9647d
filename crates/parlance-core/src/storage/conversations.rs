//! Conversation persistence
//!
//! Durable per-user mapping from identity to ordered message sequence, plus
//! named session snapshots. Writes are whole-value replacements staged
//! through a temporary file, so a failed write leaves the previously
//! committed value intact. Per-key write serialization is the store's
//! responsibility, not the orchestrator's.

use crate::error::{ParlanceError, ParlanceResult};
use crate::llm::messages::ChatMessage;
use crate::storage::sanitize_component;
use crate::types::UserId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

/// Durable per-user conversation storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a user's live conversation
    async fn get(&self, user: &UserId) -> ParlanceResult<Option<Vec<ChatMessage>>>;

    /// Replace a user's live conversation (whole-value write)
    async fn put(&self, user: &UserId, conversation: &[ChatMessage]) -> ParlanceResult<()>;

    /// Delete a user's live conversation; returns whether one existed
    async fn delete(&self, user: &UserId) -> ParlanceResult<bool>;

    /// Whether a live conversation exists for the user
    async fn exists(&self, user: &UserId) -> ParlanceResult<bool>;

    /// Names of stored snapshots for the user, sorted
    async fn list_snapshots(&self, user: &UserId) -> ParlanceResult<Vec<String>>;

    /// Store an immutable named copy of a conversation
    async fn save_snapshot(
        &self,
        user: &UserId,
        name: &str,
        conversation: &[ChatMessage],
    ) -> ParlanceResult<()>;

    /// Load a named snapshot
    async fn load_snapshot(
        &self,
        user: &UserId,
        name: &str,
    ) -> ParlanceResult<Option<Vec<ChatMessage>>>;

    /// Delete a named snapshot; returns whether it existed
    async fn delete_snapshot(&self, user: &UserId, name: &str) -> ParlanceResult<bool>;
}

/// In-memory conversation store (tests and ephemeral deployments)
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<UserId, Vec<ChatMessage>>>,
    snapshots: RwLock<HashMap<UserId, HashMap<String, Vec<ChatMessage>>>>,
}

impl MemoryConversationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get(&self, user: &UserId) -> ParlanceResult<Option<Vec<ChatMessage>>> {
        Ok(self.conversations.read().await.get(user).cloned())
    }

    async fn put(&self, user: &UserId, conversation: &[ChatMessage]) -> ParlanceResult<()> {
        self.conversations
            .write()
            .await
            .insert(user.clone(), conversation.to_vec());
        Ok(())
    }

    async fn delete(&self, user: &UserId) -> ParlanceResult<bool> {
        Ok(self.conversations.write().await.remove(user).is_some())
    }

    async fn exists(&self, user: &UserId) -> ParlanceResult<bool> {
        Ok(self.conversations.read().await.contains_key(user))
    }

    async fn list_snapshots(&self, user: &UserId) -> ParlanceResult<Vec<String>> {
        let mut names: Vec<String> = self
            .snapshots
            .read()
            .await
            .get(user)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn save_snapshot(
        &self,
        user: &UserId,
        name: &str,
        conversation: &[ChatMessage],
    ) -> ParlanceResult<()> {
        self.snapshots
            .write()
            .await
            .entry(user.clone())
            .or_default()
            .insert(name.to_string(), conversation.to_vec());
        Ok(())
    }

    async fn load_snapshot(
        &self,
        user: &UserId,
        name: &str,
    ) -> ParlanceResult<Option<Vec<ChatMessage>>> {
        Ok(self
            .snapshots
            .read()
            .await
            .get(user)
            .and_then(|m| m.get(name).cloned()))
    }

    async fn delete_snapshot(&self, user: &UserId, name: &str) -> ParlanceResult<bool> {
        Ok(self
            .snapshots
            .write()
            .await
            .get_mut(user)
            .map(|m| m.remove(name).is_some())
            .unwrap_or(false))
    }
}

/// File-based conversation store
///
/// Layout under the base directory:
/// `conversations/<user>.json` for live conversations and
/// `snapshots/<user>/<name>.json` for named snapshots.
pub struct FileConversationStore {
    base_path: PathBuf,
    // Serializes writes; reads go through the filesystem
    write_lock: RwLock<()>,
}

impl FileConversationStore {
    /// Create a store rooted at `base_path`
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: RwLock::new(()),
        }
    }

    fn conversation_path(&self, user: &UserId) -> PathBuf {
        self.base_path
            .join("conversations")
            .join(format!("{}.json", sanitize_component(user.as_str())))
    }

    fn snapshot_dir(&self, user: &UserId) -> PathBuf {
        self.base_path.join("snapshots").join(sanitize_component(user.as_str()))
    }

    fn snapshot_path(&self, user: &UserId, name: &str) -> PathBuf {
        self.snapshot_dir(user).join(format!("{}.json", sanitize_component(name)))
    }

    async fn write_value(&self, path: &Path, conversation: &[ChatMessage]) -> ParlanceResult<()> {
        let _guard = self.write_lock.write().await;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ParlanceError::storage(format!("failed to create {parent:?}: {e}")))?;
        }

        let json = serde_json::to_string_pretty(conversation)
            .map_err(|e| ParlanceError::storage(format!("failed to serialize conversation: {e}")))?;

        // Stage-then-rename so a failed write never clobbers the committed value
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| ParlanceError::storage(format!("failed to write {tmp:?}: {e}")))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| ParlanceError::storage(format!("failed to commit {path:?}: {e}")))?;

        debug!(?path, "conversation written");
        Ok(())
    }

    async fn read_value(&self, path: &Path) -> ParlanceResult<Option<Vec<ChatMessage>>> {
        match fs::read_to_string(path).await {
            Ok(json) => {
                let conversation = serde_json::from_str(&json).map_err(|e| {
                    ParlanceError::storage(format!("failed to deserialize {path:?}: {e}"))
                })?;
                Ok(Some(conversation))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ParlanceError::storage(format!(
                "failed to read {path:?}: {e}"
            ))),
        }
    }

    async fn remove_file(&self, path: &Path) -> ParlanceResult<bool> {
        let _guard = self.write_lock.write().await;
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ParlanceError::storage(format!(
                "failed to delete {path:?}: {e}"
            ))),
        }
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn get(&self, user: &UserId) -> ParlanceResult<Option<Vec<ChatMessage>>> {
        self.read_value(&self.conversation_path(user)).await
    }

    async fn put(&self, user: &UserId, conversation: &[ChatMessage]) -> ParlanceResult<()> {
        self.write_value(&self.conversation_path(user), conversation)
            .await
    }

    async fn delete(&self, user: &UserId) -> ParlanceResult<bool> {
        self.remove_file(&self.conversation_path(user)).await
    }

    async fn exists(&self, user: &UserId) -> ParlanceResult<bool> {
        Ok(self.conversation_path(user).exists())
    }

    async fn list_snapshots(&self, user: &UserId) -> ParlanceResult<Vec<String>> {
        let dir = self.snapshot_dir(user);
        let mut names = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => {
                return Err(ParlanceError::storage(format!(
                    "failed to list {dir:?}: {e}"
                )))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ParlanceError::storage(format!("failed to list {dir:?}: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(".json") {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn save_snapshot(
        &self,
        user: &UserId,
        name: &str,
        conversation: &[ChatMessage],
    ) -> ParlanceResult<()> {
        self.write_value(&self.snapshot_path(user, name), conversation)
            .await
    }

    async fn load_snapshot(
        &self,
        user: &UserId,
        name: &str,
    ) -> ParlanceResult<Option<Vec<ChatMessage>>> {
        self.read_value(&self.snapshot_path(user, name)).await
    }

    async fn delete_snapshot(&self, user: &UserId, name: &str) -> ParlanceResult<bool> {
        self.remove_file(&self.snapshot_path(user, name)).await
    }
}
