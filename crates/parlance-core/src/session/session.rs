//! Chat session orchestrator
//!
//! Owns the turn lifecycle: load conversation, append input, moderate,
//! compress to budget, call the provider, persist the advanced conversation,
//! and account usage. Provider failures surface as displayable fallback
//! replies while the stored conversation is restored to its pre-turn state,
//! so at most the in-flight turn is ever unanswered in storage.

use crate::config::ParlanceConfig;
use crate::context::config::CompressionStrategy;
use crate::context::compressor::HistoryCompressor;
use crate::context::estimator::TokenEstimator;
use crate::error::{ParlanceError, ParlanceResult};
use crate::llm::adapter::{create_provider, ProviderAdapter};
use crate::llm::messages::{ChatMessage, MessageRole, TokenUsage};
use crate::llm::provider_types::ProviderKind;
use crate::session::turn::{
    TurnOutcome, FAILURE_REPLY, MODERATION_REFUSAL, RATE_LIMITED_REPLY,
};
use crate::storage::conversations::{
    ConversationStore, FileConversationStore, MemoryConversationStore,
};
use crate::storage::usage::{
    FileUsageLedger, MemoryUsageLedger, UsageDelta, UsageLedger, UsageRecord,
};
use crate::types::UserId;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Usage counters paired with their cost under the current prices
#[derive(Debug, Clone)]
pub struct UsageReport {
    /// Accumulated counters
    pub record: UsageRecord,
    /// Monetary cost derived at read time
    pub cost: f64,
}

/// Multi-user chat orchestrator
pub struct ChatSession {
    config: ParlanceConfig,
    provider: Arc<dyn ProviderAdapter>,
    compressor: HistoryCompressor,
    store: Arc<dyn ConversationStore>,
    ledger: Arc<dyn UsageLedger>,
    // Users whose latest message is an image awaiting its caption. Kept in
    // memory only: the flag must not outlive the process while the image
    // message itself is already persisted.
    pending_images: RwLock<HashSet<UserId>>,
}

impl ChatSession {
    /// Build a session from configuration: provider adapter from the
    /// configured kind, file-backed stores when `storage_root` is set,
    /// in-memory stores otherwise.
    pub fn new(config: ParlanceConfig) -> ParlanceResult<Self> {
        config.validate()?;

        let kind = ProviderKind::from_str(&config.provider).map_err(ParlanceError::Config)?;
        let mut provider =
            create_provider(kind, config.provider_config.clone(), config.model.clone())?;
        if let Some(ratio) = config.chars_per_token {
            provider = provider.with_token_counter(Box::new(
                TokenEstimator::for_provider(&config.provider).with_chars_per_token(ratio),
            ));
        }

        let (store, ledger): (Arc<dyn ConversationStore>, Arc<dyn UsageLedger>) =
            match &config.storage_root {
                Some(root) => (
                    Arc::new(FileConversationStore::new(root)),
                    Arc::new(FileUsageLedger::new(root)),
                ),
                None => (
                    Arc::new(MemoryConversationStore::new()),
                    Arc::new(MemoryUsageLedger::new()),
                ),
            };

        Ok(Self::with_components(Arc::new(provider), store, ledger, config))
    }

    /// Build a session from explicit components (custom adapters or stores)
    pub fn with_components(
        provider: Arc<dyn ProviderAdapter>,
        store: Arc<dyn ConversationStore>,
        ledger: Arc<dyn UsageLedger>,
        config: ParlanceConfig,
    ) -> Self {
        let compressor = HistoryCompressor::new(config.compression.clone());
        Self {
            config,
            provider,
            compressor,
            store,
            ledger,
            pending_images: RwLock::new(HashSet::new()),
        }
    }

    /// The active provider adapter
    pub fn provider(&self) -> &dyn ProviderAdapter {
        self.provider.as_ref()
    }

    /// Run one text chat turn for `user`.
    ///
    /// The user message is persisted before the provider call; on failure
    /// the conversation is restored so it never stays ended on an
    /// unanswered user message. Provider failures come back as a
    /// [`TurnOutcome`] with a fallback reply (a failing moderation check
    /// lets the message through), storage failures as errors.
    pub async fn chat(&self, user: &UserId, text: &str) -> ParlanceResult<TurnOutcome> {
        let baseline = self.conversation(user).await?;
        let mut conversation = baseline.clone();

        // A pending image means this text is the caption, not a new message
        let pending = self.pending_images.read().await.contains(user);
        let captioning =
            pending && conversation.last().map(ChatMessage::has_image).unwrap_or(false);
        if captioning {
            if let Some(last) = conversation.last_mut() {
                last.attach_caption(text);
            }
        } else {
            conversation.push(ChatMessage::user(text));
        }

        let incoming = conversation
            .last()
            .cloned()
            .ok_or_else(|| ParlanceError::invalid_input("conversation is empty"))?;
        match self.provider.moderate(&incoming).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(user = %user, "message rejected by moderation");
                return Ok(TurnOutcome::failed(MODERATION_REFUSAL));
            }
            // A moderation outage must not take chat down; the message passes
            Err(e) => {
                warn!(user = %user, error = %e, "moderation check failed, message allowed");
            }
        }
        if captioning {
            self.pending_images.write().await.remove(user);
        }

        self.store.put(user, &conversation).await?;

        let mut turn_usage = TokenUsage::default();
        match self.run_completion(user, conversation, &mut turn_usage).await {
            Ok((reply, mut advanced)) => {
                advanced.push(ChatMessage::assistant(reply.as_str()));
                if let Err(e) = self.store.put(user, &advanced).await {
                    // The pre-call write left an unanswered user message in
                    // storage; restore the baseline before surfacing the fault
                    if let Err(restore) = self.store.put(user, &baseline).await {
                        warn!(
                            user = %user,
                            error = %restore,
                            "failed to restore conversation after storage fault"
                        );
                    }
                    return Err(e);
                }
                self.ledger
                    .increment(user, UsageDelta::turn(turn_usage))
                    .await?;
                Ok(TurnOutcome::completed(reply, turn_usage))
            }
            Err(e) => {
                self.store.put(user, &baseline).await?;
                if captioning {
                    self.pending_images.write().await.insert(user.clone());
                }
                match e {
                    ParlanceError::Storage(_) => Err(e),
                    ref transient if transient.is_transient() => {
                        warn!(user = %user, error = %e, "turn failed, provider rate limited");
                        Ok(TurnOutcome::failed(RATE_LIMITED_REPLY))
                    }
                    _ => {
                        warn!(user = %user, error = %e, "turn failed");
                        Ok(TurnOutcome::failed(FAILURE_REPLY))
                    }
                }
            }
        }
    }

    /// Run one voice chat turn: transcribe, then chat with the transcript.
    ///
    /// `duration_secs` is the audio length as measured by the caller and is
    /// accounted to the usage ledger.
    pub async fn chat_voice(
        &self,
        user: &UserId,
        audio: &Path,
        duration_secs: u64,
    ) -> ParlanceResult<TurnOutcome> {
        let Some(transcript) = self.provider.transcribe(audio).await? else {
            return Err(ParlanceError::Unsupported(
                "speech transcription".to_string(),
            ));
        };

        self.ledger
            .increment(
                user,
                UsageDelta::default().with_voice_seconds(duration_secs),
            )
            .await?;

        let outcome = self.chat(user, &transcript).await?;
        Ok(outcome.with_transcript(transcript))
    }

    /// Append a base64-encoded image to the conversation and mark it as
    /// awaiting a caption; the next [`chat`](Self::chat) call supplies it.
    pub async fn add_image(&self, user: &UserId, image_b64: &str) -> ParlanceResult<()> {
        if !self.provider.capabilities().vision {
            return Err(ParlanceError::Unsupported(
                "image understanding".to_string(),
            ));
        }

        let mut conversation = self.conversation(user).await?;
        conversation.push(ChatMessage::user_image(image_b64));
        self.store.put(user, &conversation).await?;
        self.pending_images.write().await.insert(user.clone());

        self.ledger
            .increment(user, UsageDelta::default().with_images(1))
            .await?;
        debug!(user = %user, "image attached, awaiting caption");
        Ok(())
    }

    /// Feed the text of a file into the conversation and return the
    /// assistant's first reaction to it.
    ///
    /// Oversized text is condensed by chunked summarization before it ever
    /// reaches the conversation; summarization spend is accounted to the
    /// ledger.
    pub async fn ingest_file(
        &self,
        user: &UserId,
        file_name: &str,
        text: &str,
    ) -> ParlanceResult<TurnOutcome> {
        if text.trim().is_empty() {
            return Err(ParlanceError::invalid_input("file contains no text"));
        }

        let (digest, condense_usage) = self.condense(text).await?;
        if condense_usage != TokenUsage::default() {
            self.ledger
                .increment(user, UsageDelta::tokens(condense_usage))
                .await?;
        }

        let prompt = format!(
            "The user shared the file '{file_name}'. Use its contents to answer \
             the questions that follow:\n{digest}"
        );
        self.chat(user, &prompt).await
    }

    /// Forget the user's conversation and start over from the system prompt
    pub async fn reset(&self, user: &UserId) -> ParlanceResult<()> {
        self.pending_images.write().await.remove(user);
        self.store
            .put(user, &[ChatMessage::system(&self.config.system_prompt)])
            .await
    }

    /// Replace the system message of the user's conversation
    pub async fn set_system_prompt(&self, user: &UserId, prompt: &str) -> ParlanceResult<()> {
        if prompt.trim().is_empty() {
            return Err(ParlanceError::invalid_input("system prompt must not be empty"));
        }

        let mut conversation = self.conversation(user).await?;
        match conversation.first_mut() {
            Some(first) if first.role == MessageRole::System => {
                *first = ChatMessage::system(prompt);
            }
            _ => conversation.insert(0, ChatMessage::system(prompt)),
        }
        self.store.put(user, &conversation).await
    }

    /// Current conversation as stored (fresh conversations start with the
    /// configured system prompt)
    pub async fn history(&self, user: &UserId) -> ParlanceResult<Vec<ChatMessage>> {
        self.conversation(user).await
    }

    /// Store the live conversation under a name for later retrieval
    pub async fn save_session(&self, user: &UserId, name: &str) -> ParlanceResult<()> {
        if name.trim().is_empty() {
            return Err(ParlanceError::invalid_input("session name must not be empty"));
        }
        let conversation = self.conversation(user).await?;
        self.store.save_snapshot(user, name, &conversation).await
    }

    /// Replace the live conversation with a named stored session
    pub async fn load_session(&self, user: &UserId, name: &str) -> ParlanceResult<()> {
        let conversation = self
            .store
            .load_snapshot(user, name)
            .await?
            .ok_or_else(|| {
                ParlanceError::invalid_input(format!("no stored session named '{name}'"))
            })?;
        self.pending_images.write().await.remove(user);
        self.store.put(user, &conversation).await
    }

    /// Names of the user's stored sessions
    pub async fn list_sessions(&self, user: &UserId) -> ParlanceResult<Vec<String>> {
        self.store.list_snapshots(user).await
    }

    /// Delete a named stored session; returns whether it existed
    pub async fn delete_session(&self, user: &UserId, name: &str) -> ParlanceResult<bool> {
        self.store.delete_snapshot(user, name).await
    }

    /// Usage counters and their cost under the configured prices
    pub async fn usage_report(&self, user: &UserId) -> ParlanceResult<UsageReport> {
        let record = self.ledger.get(user).await?.unwrap_or_default();
        let cost = record.cost(&self.config.pricing);
        Ok(UsageReport { record, cost })
    }

    async fn conversation(&self, user: &UserId) -> ParlanceResult<Vec<ChatMessage>> {
        match self.store.get(user).await? {
            Some(conversation) if !conversation.is_empty() => Ok(conversation),
            _ => Ok(vec![ChatMessage::system(&self.config.system_prompt)]),
        }
    }

    /// Compress to budget and call the provider, retrying once after
    /// whole-conversation summarization when the provider rejects the
    /// request as too large or malformed.
    async fn run_completion(
        &self,
        user: &UserId,
        conversation: Vec<ChatMessage>,
        usage: &mut TokenUsage,
    ) -> ParlanceResult<(String, Vec<ChatMessage>)> {
        let conversation = self.fit_budget(conversation, usage).await?;

        match self.provider.chat(&conversation, user).await {
            Ok(outcome) => {
                *usage += outcome.usage;
                Ok((outcome.content, conversation))
            }
            Err(ParlanceError::InvalidRequest(reason)) => {
                warn!(
                    user = %user,
                    reason = %reason,
                    "provider rejected the request, summarizing and retrying once"
                );
                let condensed = self.summarize_for_retry(conversation, usage).await?;
                let outcome = self.provider.chat(&condensed, user).await?;
                *usage += outcome.usage;
                Ok((outcome.content, condensed))
            }
            Err(e) => Err(e),
        }
    }

    async fn fit_budget(
        &self,
        conversation: Vec<ChatMessage>,
        usage: &mut TokenUsage,
    ) -> ParlanceResult<Vec<ChatMessage>> {
        let strategy = self.compressor.config().strategy;
        let outcome = match self
            .compressor
            .compress(conversation.clone(), self.provider.as_ref())
            .await
        {
            Ok(outcome) => outcome,
            // Conversations too short to summarize can still be trimmed
            Err(ParlanceError::CannotCompress(_))
                if strategy == CompressionStrategy::Summarize =>
            {
                self.compressor
                    .compress_with(conversation, CompressionStrategy::Trim, self.provider.as_ref())
                    .await?
            }
            Err(e) => return Err(e),
        };
        *usage += outcome.usage;
        Ok(outcome.messages)
    }

    /// Collapse the conversation to a synthetic system message carrying a
    /// summary, keeping only the latest user message verbatim.
    async fn summarize_for_retry(
        &self,
        conversation: Vec<ChatMessage>,
        usage: &mut TokenUsage,
    ) -> ParlanceResult<Vec<ChatMessage>> {
        let last = conversation
            .last()
            .cloned()
            .ok_or_else(|| ParlanceError::invalid_input("conversation is empty"))?;

        let system_text = conversation
            .first()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.text().to_string())
            .unwrap_or_else(|| self.config.system_prompt.clone());

        let transcript = conversation[..conversation.len() - 1]
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| format!("{}: {}", m.role, m.text()))
            .collect::<Vec<_>>()
            .join("\n");

        let (summary, summary_usage) = self
            .provider
            .summarize(&transcript, self.compressor.config().summary_tokens)
            .await?;
        *usage += summary_usage;

        Ok(vec![
            ChatMessage::system(format!(
                "{system_text}\nYour previous conversation summary: {summary}"
            )),
            last,
        ])
    }

    /// Shrink text below the ingestion cap by summarizing fixed-size chunks,
    /// recursively up to the configured depth, then hard-truncating as a
    /// last resort.
    async fn condense(&self, text: &str) -> ParlanceResult<(String, TokenUsage)> {
        let limits = &self.config.file_ingest;
        let mut current = text.to_string();
        let mut usage = TokenUsage::default();

        for depth in 0..limits.max_depth {
            if current.chars().count() <= limits.max_chars {
                return Ok((current, usage));
            }

            debug!(depth, chars = current.chars().count(), "condensing file text");
            let chars: Vec<char> = current.chars().collect();
            let mut parts = Vec::new();
            for chunk in chars.chunks(limits.max_chars) {
                let chunk_text: String = chunk.iter().collect();
                let (summary, chunk_usage) = self
                    .provider
                    .summarize(&chunk_text, limits.summary_tokens)
                    .await?;
                usage += chunk_usage;
                parts.push(summary);
            }
            current = parts.join("\n");
        }

        if current.chars().count() > limits.max_chars {
            warn!("condensation depth exhausted, truncating file text");
            current = current.chars().take(limits.max_chars).collect();
        }
        Ok((current, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileIngestConfig;
    use crate::context::config::CompressionConfig;
    use crate::llm::adapter::MockProviderAdapter;
    use crate::llm::messages::ChatOutcome;
    use crate::llm::provider_types::Capabilities;
    use crate::session::turn::TurnStatus;

    fn test_config() -> ParlanceConfig {
        ParlanceConfig {
            system_prompt: "You are a helpful assistant.".to_string(),
            ..Default::default()
        }
    }

    fn session(provider: MockProviderAdapter, config: ParlanceConfig) -> ChatSession {
        ChatSession::with_components(
            Arc::new(provider),
            Arc::new(MemoryConversationStore::new()),
            Arc::new(MemoryUsageLedger::new()),
            config,
        )
    }

    /// Mock that always moderates clean and never needs compression
    fn quiet_provider() -> MockProviderAdapter {
        let mut provider = MockProviderAdapter::new();
        provider.expect_moderate().returning(|_| Ok(true));
        provider.expect_count_tokens().returning(|_| 10);
        provider
    }

    #[tokio::test]
    async fn test_chat_advances_conversation_and_ledger() {
        let mut provider = quiet_provider();
        provider.expect_chat().times(1).returning(|_, _| {
            Ok(ChatOutcome {
                content: "Hi there!".to_string(),
                usage: TokenUsage::new(12, 5),
            })
        });

        let session = session(provider, test_config());
        let user = UserId::from("alice");

        let outcome = session.chat(&user, "Hello").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.response, "Hi there!");
        assert_eq!(outcome.usage, TokenUsage::new(12, 5));

        let history = session.history(&user).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, MessageRole::System);
        assert_eq!(history[1].text(), "Hello");
        assert_eq!(history[2].text(), "Hi there!");

        let report = session.usage_report(&user).await.unwrap();
        assert_eq!(report.record.messages_sent, 1);
        assert_eq!(report.record.prompt_tokens, 12);
        assert_eq!(report.record.completion_tokens, 5);
    }

    #[tokio::test]
    async fn test_rate_limit_rolls_back_and_leaves_ledger_untouched() {
        let mut provider = quiet_provider();
        provider
            .expect_chat()
            .times(1)
            .returning(|_, _| Err(ParlanceError::rate_limited("429")));

        let session = session(provider, test_config());
        let user = UserId::from("bob");

        let outcome = session.chat(&user, "Hello").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Failed);
        assert_eq!(outcome.response, RATE_LIMITED_REPLY);

        // No unanswered user message survives the failed turn
        let history = session.history(&user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, MessageRole::System);

        let report = session.usage_report(&user).await.unwrap();
        assert_eq!(report.record, UsageRecord::default());
    }

    #[tokio::test]
    async fn test_invalid_request_retries_once_with_summary() {
        let mut provider = quiet_provider();
        provider
            .expect_chat()
            .times(1)
            .returning(|_, _| Err(ParlanceError::invalid_request("context too long")));
        provider
            .expect_summarize()
            .times(1)
            .returning(|_, _| Ok(("we talked about knights".to_string(), TokenUsage::new(50, 20))));
        provider
            .expect_chat()
            .times(1)
            .withf(|messages, _| {
                messages.len() == 2
                    && messages[0]
                        .text()
                        .contains("Your previous conversation summary: we talked about knights")
            })
            .returning(|_, _| {
                Ok(ChatOutcome {
                    content: "recovered".to_string(),
                    usage: TokenUsage::new(80, 30),
                })
            });

        let session = session(provider, test_config());
        let user = UserId::from("carol");

        let outcome = session.chat(&user, "and then?").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.response, "recovered");
        // Summarization spend counts toward the turn
        assert_eq!(outcome.usage, TokenUsage::new(130, 50));

        // Conversation was rebuilt around the summary
        let history = session.history(&user).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].text(), "and then?");
        assert_eq!(history[2].text(), "recovered");
    }

    #[tokio::test]
    async fn test_moderation_outage_does_not_block_turn() {
        let mut provider = MockProviderAdapter::new();
        provider
            .expect_moderate()
            .returning(|_| Err(ParlanceError::provider("moderation endpoint down")));
        provider.expect_count_tokens().returning(|_| 10);
        provider.expect_chat().times(1).returning(|_, _| {
            Ok(ChatOutcome {
                content: "still here".to_string(),
                usage: TokenUsage::new(3, 2),
            })
        });

        let session = session(provider, test_config());
        let outcome = session.chat(&UserId::from("nina"), "hello").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.response, "still here");
    }

    /// Store whose nth put fails, every other call delegating to memory
    struct FailingPutStore {
        inner: MemoryConversationStore,
        fail_on: usize,
        puts: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ConversationStore for FailingPutStore {
        async fn get(&self, user: &UserId) -> ParlanceResult<Option<Vec<ChatMessage>>> {
            self.inner.get(user).await
        }

        async fn put(&self, user: &UserId, conversation: &[ChatMessage]) -> ParlanceResult<()> {
            let n = self.puts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if n == self.fail_on {
                return Err(ParlanceError::storage("disk full"));
            }
            self.inner.put(user, conversation).await
        }

        async fn delete(&self, user: &UserId) -> ParlanceResult<bool> {
            self.inner.delete(user).await
        }

        async fn exists(&self, user: &UserId) -> ParlanceResult<bool> {
            self.inner.exists(user).await
        }

        async fn list_snapshots(&self, user: &UserId) -> ParlanceResult<Vec<String>> {
            self.inner.list_snapshots(user).await
        }

        async fn save_snapshot(
            &self,
            user: &UserId,
            name: &str,
            conversation: &[ChatMessage],
        ) -> ParlanceResult<()> {
            self.inner.save_snapshot(user, name, conversation).await
        }

        async fn load_snapshot(
            &self,
            user: &UserId,
            name: &str,
        ) -> ParlanceResult<Option<Vec<ChatMessage>>> {
            self.inner.load_snapshot(user, name).await
        }

        async fn delete_snapshot(&self, user: &UserId, name: &str) -> ParlanceResult<bool> {
            self.inner.delete_snapshot(user, name).await
        }
    }

    #[tokio::test]
    async fn test_storage_fault_after_reply_restores_conversation() {
        let mut provider = quiet_provider();
        provider.expect_chat().returning(|_, _| {
            Ok(ChatOutcome {
                content: "late reply".to_string(),
                usage: TokenUsage::new(2, 2),
            })
        });

        // Put #1 persists the user message, put #2 (the advanced
        // conversation) fails, put #3 is the restore
        let store = Arc::new(FailingPutStore {
            inner: MemoryConversationStore::new(),
            fail_on: 2,
            puts: std::sync::atomic::AtomicUsize::new(0),
        });
        let session = ChatSession::with_components(
            Arc::new(provider),
            store.clone(),
            Arc::new(MemoryUsageLedger::new()),
            test_config(),
        );
        let user = UserId::from("oscar");

        let err = session.chat(&user, "hello").await.unwrap_err();
        assert!(matches!(err, ParlanceError::Storage(_)));

        // No unanswered user message survives the fault
        let persisted = store.inner.get(&user).await.unwrap().unwrap();
        assert_eq!(persisted.last().map(|m| m.role), Some(MessageRole::System));
        assert_eq!(
            session.usage_report(&user).await.unwrap().record.messages_sent,
            0
        );
    }

    #[test]
    fn test_chars_per_token_override_reaches_estimator() {
        let config = ParlanceConfig {
            chars_per_token: Some(1.0),
            ..test_config()
        };
        let session = ChatSession::new(config).unwrap();

        // 100 chars at 1.0 chars/token + 4 per-message overhead
        let messages = vec![ChatMessage::user("x".repeat(100))];
        assert_eq!(session.provider().count_tokens(&messages), 104);
    }

    #[tokio::test]
    async fn test_moderation_refusal_persists_nothing() {
        let mut provider = MockProviderAdapter::new();
        provider.expect_moderate().returning(|_| Ok(false));

        let session = session(provider, test_config());
        let user = UserId::from("dave");

        let outcome = session.chat(&user, "something nasty").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Failed);
        assert_eq!(outcome.response, MODERATION_REFUSAL);

        assert_eq!(session.history(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_image_caption_merges_into_one_message() {
        let mut provider = quiet_provider();
        provider.expect_capabilities().returning(|| Capabilities {
            chat: true,
            speech: false,
            vision: true,
            moderation: false,
        });
        provider
            .expect_chat()
            .times(1)
            .withf(|messages, _| {
                // [system, image+caption]; the caption never becomes its own message
                messages.len() == 2
                    && messages[1].has_image()
                    && messages[1].text() == "What is pictured here?"
            })
            .returning(|_, _| {
                Ok(ChatOutcome {
                    content: "A cat.".to_string(),
                    usage: TokenUsage::new(20, 3),
                })
            });

        let session = session(provider, test_config());
        let user = UserId::from("erin");

        session.add_image(&user, "base64data").await.unwrap();
        let outcome = session.chat(&user, "What is pictured here?").await.unwrap();
        assert_eq!(outcome.response, "A cat.");

        let history = session.history(&user).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[1].has_image());
        assert_eq!(history[1].text(), "What is pictured here?");

        let report = session.usage_report(&user).await.unwrap();
        assert_eq!(report.record.images, 1);
    }

    #[tokio::test]
    async fn test_add_image_without_vision_is_unsupported() {
        let mut provider = MockProviderAdapter::new();
        provider
            .expect_capabilities()
            .returning(Capabilities::default);

        let session = session(provider, test_config());
        let err = session
            .add_image(&UserId::from("frank"), "data")
            .await
            .unwrap_err();
        assert!(matches!(err, ParlanceError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_summarize_falls_back_to_trim_for_short_conversations() {
        let mut provider = MockProviderAdapter::new();
        provider.expect_moderate().returning(|_| Ok(true));
        // 1000 tokens per message: 4 messages exceed the 2500 budget
        provider
            .expect_count_tokens()
            .returning(|messages| messages.len() * 1000);
        provider
            .expect_chat()
            .times(1)
            .withf(|messages, _| messages.len() == 2 && messages[0].role == MessageRole::System)
            .returning(|_, _| {
                Ok(ChatOutcome {
                    content: "short answer".to_string(),
                    usage: TokenUsage::new(5, 5),
                })
            });

        let mut config = test_config();
        // keep_tail larger than the conversation makes summarization refuse
        config.compression = CompressionConfig::new()
            .with_max_tokens(2500)
            .with_strategy(CompressionStrategy::Summarize)
            .with_keep_tail(5);

        let store = Arc::new(MemoryConversationStore::new());
        let user = UserId::from("grace");
        store
            .put(
                &user,
                &[
                    ChatMessage::system("You are a helpful assistant."),
                    ChatMessage::user("first"),
                    ChatMessage::assistant("first answer"),
                ],
            )
            .await
            .unwrap();

        let session = ChatSession::with_components(
            Arc::new(provider),
            store,
            Arc::new(MemoryUsageLedger::new()),
            config,
        );

        let outcome = session.chat(&user, "second").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn test_voice_turn_records_duration_and_transcript() {
        let mut provider = quiet_provider();
        provider
            .expect_transcribe()
            .returning(|_| Ok(Some("what time is it".to_string())));
        provider
            .expect_chat()
            .withf(|messages, _| messages.last().map(|m| m.text()) == Some("what time is it"))
            .returning(|_, _| {
                Ok(ChatOutcome {
                    content: "Time to chat.".to_string(),
                    usage: TokenUsage::new(8, 4),
                })
            });

        let session = session(provider, test_config());
        let user = UserId::from("heidi");

        let outcome = session
            .chat_voice(&user, Path::new("/tmp/voice.ogg"), 12)
            .await
            .unwrap();
        assert_eq!(outcome.transcript.as_deref(), Some("what time is it"));
        assert_eq!(outcome.response, "Time to chat.");

        let report = session.usage_report(&user).await.unwrap();
        assert_eq!(report.record.voice_seconds, 12);
        assert_eq!(report.record.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_voice_without_speech_support_is_unsupported() {
        let mut provider = MockProviderAdapter::new();
        provider.expect_transcribe().returning(|_| Ok(None));

        let session = session(provider, test_config());
        let err = session
            .chat_voice(&UserId::from("ivan"), Path::new("/tmp/v.ogg"), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, ParlanceError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_ingest_small_file_passes_text_through() {
        let mut provider = quiet_provider();
        provider
            .expect_chat()
            .withf(|messages, _| {
                let text = messages.last().map(|m| m.text()).unwrap_or("");
                text.contains("notes.txt") && text.contains("short file body")
            })
            .returning(|_, _| {
                Ok(ChatOutcome {
                    content: "Got it.".to_string(),
                    usage: TokenUsage::new(30, 5),
                })
            });

        let session = session(provider, test_config());
        let outcome = session
            .ingest_file(&UserId::from("judy"), "notes.txt", "short file body")
            .await
            .unwrap();
        assert_eq!(outcome.response, "Got it.");
    }

    #[tokio::test]
    async fn test_ingest_oversized_file_is_condensed_first() {
        let mut provider = quiet_provider();
        provider
            .expect_summarize()
            // 250 chars with a 100-char cap: chunks of 100, 100, 50
            .times(3)
            .returning(|_, _| Ok(("gist".to_string(), TokenUsage::new(25, 2))));
        provider
            .expect_chat()
            .withf(|messages, _| {
                let text = messages.last().map(|m| m.text()).unwrap_or("");
                text.contains("gist") && !text.contains("xxxx")
            })
            .returning(|_, _| {
                Ok(ChatOutcome {
                    content: "Summarized.".to_string(),
                    usage: TokenUsage::new(10, 4),
                })
            });

        let mut config = test_config();
        config.file_ingest = FileIngestConfig {
            max_chars: 100,
            summary_tokens: 100,
            max_depth: 3,
        };

        let session = session(provider, config);
        let user = UserId::from("kate");
        let outcome = session
            .ingest_file(&user, "book.txt", &"x".repeat(250))
            .await
            .unwrap();
        assert_eq!(outcome.response, "Summarized.");

        // Condensation spend is accounted even though it is not a turn
        let report = session.usage_report(&user).await.unwrap();
        assert_eq!(report.record.prompt_tokens, 25 * 3 + 10);
        assert_eq!(report.record.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_reset_and_set_system_prompt() {
        let mut provider = quiet_provider();
        provider.expect_chat().returning(|_, _| {
            Ok(ChatOutcome {
                content: "ok".to_string(),
                usage: TokenUsage::new(1, 1),
            })
        });

        let session = session(provider, test_config());
        let user = UserId::from("leo");

        session.chat(&user, "hello").await.unwrap();
        assert_eq!(session.history(&user).await.unwrap().len(), 3);

        session.reset(&user).await.unwrap();
        let history = session.history(&user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text(), "You are a helpful assistant.");

        session
            .set_system_prompt(&user, "You are a pirate.")
            .await
            .unwrap();
        assert_eq!(
            session.history(&user).await.unwrap()[0].text(),
            "You are a pirate."
        );
        assert!(session.set_system_prompt(&user, "  ").await.is_err());
    }

    #[tokio::test]
    async fn test_named_sessions_round_trip() {
        let mut provider = quiet_provider();
        provider.expect_chat().returning(|_, _| {
            Ok(ChatOutcome {
                content: "ok".to_string(),
                usage: TokenUsage::new(1, 1),
            })
        });

        let session = session(provider, test_config());
        let user = UserId::from("mona");

        session.chat(&user, "remember this").await.unwrap();
        session.save_session(&user, "checkpoint").await.unwrap();
        session.reset(&user).await.unwrap();
        assert_eq!(session.history(&user).await.unwrap().len(), 1);

        assert_eq!(
            session.list_sessions(&user).await.unwrap(),
            vec!["checkpoint".to_string()]
        );
        session.load_session(&user, "checkpoint").await.unwrap();
        assert_eq!(session.history(&user).await.unwrap().len(), 3);

        assert!(session.delete_session(&user, "checkpoint").await.unwrap());
        assert!(session.load_session(&user, "checkpoint").await.is_err());
    }
}
