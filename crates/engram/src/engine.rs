//! The memory engine - owned wiring of every subsystem component
//!
//! [`MemoryEngine`] is the explicit context object handed to request
//! handlers: it owns the store, vector index, scorer, cache, conversation
//! contexts, and recovery coordinator, with no module-level singletons. Its
//! lifecycle is tied to process start/stop - [`MemoryEngine::start`] loads
//! persisted state and spawns the maintenance sweeps, and
//! [`MemoryEngine::shutdown`] stops them deterministically.
//!
//! Writes are guarded by the recovery coordinator; the store serializes all
//! file rewrites; the context manager's lock orders same-conversation
//! appends.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStats, MemoryCache};
use crate::compression::CompressionStats;
use crate::config::EngramConfig;
use crate::context::{ContextSummary, ConversationContextManager, Exchange};
use crate::crypto::EncryptionCodec;
use crate::error::{EngramError, EngramResult};
use crate::maintenance::spawn_periodic;
use crate::priority::{AccessKind, PriorityScorer, RankedMemory, RetrievalContext};
use crate::record::MemoryRecord;
use crate::recovery::{OperationContext, PendingOperation, RecoveryCoordinator};
use crate::store::PersistentMemoryStore;
use crate::vector::{EmbeddingProvider, SearchOptions, SearchResult, TokenHashEmbedder, VectorIndex};

const MAX_PROMPT_LENGTH: usize = 2000;
const PREWARM_LIMIT: usize = 100;
const RECALL_TOP_K: usize = 3;
const RECALL_MIN_SCORE: f32 = 0.65;

/// Outcome of a storage optimization pass
#[derive(Debug)]
pub enum StorageOptimization {
    /// The store already fit the budget
    Unchanged {
        /// Current total size
        total_bytes: usize,
    },

    /// Compression alone brought the store under budget
    Compressed {
        /// Size after compression
        total_bytes: usize,
        /// Bytes recovered
        saved_bytes: u64,
    },

    /// Compression was insufficient; low-priority records were dropped
    Pruned {
        /// Records kept
        kept: usize,
        /// Records dropped
        dropped: usize,
    },
}

/// Coordinates every component of the memory subsystem
pub struct MemoryEngine {
    config: EngramConfig,
    store: Arc<PersistentMemoryStore>,
    index: Arc<VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    scorer: Arc<Mutex<PriorityScorer>>,
    cache: Arc<Mutex<MemoryCache>>,
    contexts: Arc<Mutex<ConversationContextManager>>,
    recovery: Arc<RecoveryCoordinator>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MemoryEngine {
    /// Create an engine with the built-in deterministic embedder
    pub fn new(config: EngramConfig) -> EngramResult<Self> {
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::new(TokenHashEmbedder::new(config.vector_dimensions));
        Self::with_embedding_provider(config, provider)
    }

    /// Create an engine with a caller-supplied embedding backend
    pub fn with_embedding_provider(
        config: EngramConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> EngramResult<Self> {
        let codec = match &config.encryption_key {
            Some(key) => Some(EncryptionCodec::new(key.clone())?),
            None => None,
        };

        let store = Arc::new(PersistentMemoryStore::new(config.store_path(), codec));
        let index = Arc::new(VectorIndex::new(config.index_path(), provider.clone()));
        let recovery = Arc::new(RecoveryCoordinator::new(
            config.backup_dir(),
            config.max_write_retries,
        ));

        Ok(Self {
            scorer: Arc::new(Mutex::new(PriorityScorer::new())),
            cache: Arc::new(Mutex::new(MemoryCache::new(
                config.cache_max_items,
                config.cache_max_bytes,
                config.cache_ttl,
            ))),
            contexts: Arc::new(Mutex::new(ConversationContextManager::new(
                config.context_window,
                config.context_ttl,
            ))),
            store,
            index,
            provider,
            recovery,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Load persisted state, prewarm the cache, and start maintenance
    pub async fn start(&self) {
        self.index.load().await;
        self.prewarm_cache().await;

        let retention = chrono::Duration::from_std(self.config.vector_retention)
            .unwrap_or_else(|_| chrono::Duration::days(30));

        let index = self.index.clone();
        let index_task = spawn_periodic(
            "vector_index_sweep",
            self.config.index_sweep_interval,
            self.shutdown.clone(),
            move || {
                let index = index.clone();
                async move {
                    index.maintain(retention).await;
                }
            },
        );

        let contexts = self.contexts.clone();
        let context_task = spawn_periodic(
            "context_expiry_sweep",
            self.config.context_sweep_interval,
            self.shutdown.clone(),
            move || {
                let contexts = contexts.clone();
                async move {
                    contexts.lock().await.sweep_expired();
                }
            },
        );

        let recovery = self.recovery.clone();
        let backup_max_age = self.config.backup_max_age;
        let backup_task = spawn_periodic(
            "backup_cleanup",
            self.config.backup_max_age,
            self.shutdown.clone(),
            move || {
                let recovery = recovery.clone();
                async move {
                    recovery.cleanup_old_backups(backup_max_age).await;
                }
            },
        );

        let mut tasks = self.tasks.lock().await;
        tasks.extend([index_task, context_task, backup_task]);

        tracing::info!(
            cache_stats = ?self.cache.lock().await.stats(),
            "Memory engine started"
        );
    }

    /// Stop maintenance tasks and persist the vector index
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Maintenance task did not stop cleanly");
            }
        }

        if let Err(e) = self.index.persist().await {
            tracing::error!(error = %e, "Failed to persist vector index on shutdown");
        }
        tracing::info!("Memory engine stopped");
    }

    /// Generate a fresh conversation id
    pub fn new_conversation(&self) -> String {
        ConversationContextManager::generate_id()
    }

    /// Store a new interaction durably and update every derived view
    ///
    /// The persistent write is guarded by the recovery coordinator (backup,
    /// bounded retry, restore on failure). Cache admission rejection is
    /// non-fatal; vector indexing is best-effort.
    pub async fn record_interaction(
        &self,
        text: &str,
        response: &str,
        conversation_id: Option<String>,
    ) -> EngramResult<MemoryRecord> {
        validate_prompt(text)?;

        let mut record = MemoryRecord::new(text, response);
        if let Some(id) = &conversation_id {
            record.conversation_id = Some(id.clone());
        }

        record.priority = self.scorer.lock().await.classify(&record).score();

        match self.provider.embed(&record.content()).await {
            Ok(embedding) => record.embedding = Some(embedding.vector),
            Err(e) => {
                tracing::warn!(record_id = %record.id, error = %e, "Embedding generation failed")
            }
        }

        let store = self.store.clone();
        let record_for_write = record.clone();
        let context = OperationContext::with_file("memory_save", self.store.path());
        self.recovery
            .with_recovery(
                move || {
                    let store = store.clone();
                    let record = record_for_write.clone();
                    async move { store.append(record).await }
                },
                &context,
            )
            .await?;

        self.scorer
            .lock()
            .await
            .update_on_access(&record, AccessKind::Write);

        if !self.cache.lock().await.set(record.id.clone(), record.clone()) {
            tracing::debug!(record_id = %record.id, "New record not admitted to cache");
        }

        let mut metadata = HashMap::new();
        if let Some(id) = &record.conversation_id {
            metadata.insert("conversationId".to_string(), id.clone());
        }
        if let Err(e) = self
            .index
            .add_memory(record.id.clone(), &record.content(), metadata)
            .await
        {
            tracing::error!(record_id = %record.id, error = %e, "Failed to index record");
        }

        if let Some(id) = &conversation_id {
            self.contexts.lock().await.append(id, text, response);
        }

        tracing::debug!(record_id = %record.id, "Interaction recorded");
        Ok(record)
    }

    /// Rank stored memories by relevance to `query` in its conversation
    ///
    /// Candidates come from the authoritative store plus any live cache
    /// entries; at most five results come back, all above the relevance
    /// threshold, best first. Read-path failures degrade to an empty list.
    pub async fn retrieve_relevant(
        &self,
        query: &str,
        conversation_id: Option<&str>,
    ) -> Vec<RankedMemory> {
        let exchanges = match conversation_id {
            Some(id) => self.contexts.lock().await.get(id),
            None => Vec::new(),
        };
        let context = RetrievalContext {
            conversation_id: conversation_id.map(String::from),
            exchanges,
        };

        let candidates = self.load_candidates().await;
        let ranked = self
            .scorer
            .lock()
            .await
            .find_relevant(query, &context, &candidates);

        if !ranked.is_empty() {
            let ids: Vec<String> = ranked.iter().map(|m| m.record.id.clone()).collect();
            self.index.touch(&ids).await;

            let mut scorer = self.scorer.lock().await;
            for m in &ranked {
                scorer.update_on_access(&m.record, AccessKind::Read);
            }
        }

        ranked
    }

    /// Pure vector-similarity recall over the index
    pub async fn recall_similar(&self, text: &str) -> Vec<SearchResult> {
        self.index
            .search(
                text,
                SearchOptions::default()
                    .with_top_k(RECALL_TOP_K)
                    .with_min_score(RECALL_MIN_SCORE),
            )
            .await
    }

    /// The conversation's windowed exchanges
    pub async fn get_context(&self, conversation_id: &str) -> Vec<Exchange> {
        self.contexts.lock().await.get(conversation_id)
    }

    /// Summarize a conversation's window
    pub async fn summarize_context(&self, conversation_id: &str) -> Option<ContextSummary> {
        self.contexts.lock().await.summarize(conversation_id)
    }

    /// Merge one conversation's history into another
    pub async fn merge_contexts(&self, source: &str, target: &str) -> bool {
        self.contexts.lock().await.merge(source, target)
    }

    /// Current cache usage counters
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    /// Number of live conversation sessions
    pub async fn active_conversations(&self) -> usize {
        self.contexts.lock().await.active_count()
    }

    /// Compressor activity counters
    pub fn compression_stats(&self) -> CompressionStats {
        self.store.compression_stats()
    }

    /// Operations interrupted mid-write, left for startup inspection
    pub async fn pending_recoveries(&self) -> Vec<PendingOperation> {
        self.recovery.pending_operations().await
    }

    /// Bring the store under `max_bytes`, compressing first and pruning
    /// low-priority records only when compression is insufficient
    pub async fn optimize_storage(&self, max_bytes: usize) -> EngramResult<StorageOptimization> {
        let mut records = self.store.load().await;
        let total: usize = records.iter().map(|r| r.size_bytes()).sum();

        if total <= max_bytes {
            return Ok(StorageOptimization::Unchanged { total_bytes: total });
        }

        let saved = self.store.compress_records(&mut records)?;
        let compressed_total: usize = records.iter().map(|r| r.size_bytes()).sum();

        if compressed_total <= max_bytes {
            self.rewrite_store(&records).await?;
            self.refresh_cache().await;
            tracing::info!(
                original_size = total,
                compressed_size = compressed_total,
                "Storage optimized through compression"
            );
            return Ok(StorageOptimization::Compressed {
                total_bytes: compressed_total,
                saved_bytes: saved,
            });
        }

        tracing::warn!(
            required = max_bytes,
            current = compressed_total,
            "Compression insufficient, some memories will be removed"
        );

        let before = records.len();
        let kept = self
            .scorer
            .lock()
            .await
            .prune_by_priority(records, max_bytes);
        let kept_count = kept.len();

        self.rewrite_store(&kept).await?;
        self.refresh_cache().await;

        Ok(StorageOptimization::Pruned {
            kept: kept_count,
            dropped: before - kept_count,
        })
    }

    /// Populate the cache with the highest-priority stored records
    pub async fn prewarm_cache(&self) {
        let records = self.store.load().await;
        if records.is_empty() {
            return;
        }

        let top = {
            let mut scorer = self.scorer.lock().await;
            let mut sorted = scorer.sort_by_priority(records);
            sorted.truncate(PREWARM_LIMIT);
            sorted
        };

        let admitted = self
            .cache
            .lock()
            .await
            .set_many(top.into_iter().map(|r| (r.id.clone(), r)).collect());
        tracing::debug!(admitted, "Cache prewarmed");
    }

    // Store plus live cache entries, deduplicated by id (store wins)
    async fn load_candidates(&self) -> Vec<MemoryRecord> {
        let mut records = self.store.load().await;
        let mut seen: std::collections::HashSet<String> =
            records.iter().map(|r| r.id.clone()).collect();

        for record in self.cache.lock().await.get_all() {
            if seen.insert(record.id.clone()) {
                records.push(record);
            }
        }
        records
    }

    async fn rewrite_store(&self, records: &[MemoryRecord]) -> EngramResult<()> {
        let store = self.store.clone();
        let records = records.to_vec();
        let context = OperationContext::with_file("memory_optimize", self.store.path());
        self.recovery
            .with_recovery(
                move || {
                    let store = store.clone();
                    let records = records.clone();
                    async move { store.replace_all(&records).await }
                },
                &context,
            )
            .await
    }

    async fn refresh_cache(&self) {
        let records = self.store.load().await;
        let mut cache = self.cache.lock().await;
        cache.clear();
        cache.set_many(records.into_iter().map(|r| (r.id.clone(), r)).collect());
    }
}

fn validate_prompt(text: &str) -> EngramResult<()> {
    if text.is_empty() {
        return Err(EngramError::validation(
            "text",
            "must not be empty",
            "empty string",
        ));
    }
    let length = text.chars().count();
    if length > MAX_PROMPT_LENGTH {
        return Err(EngramError::validation(
            "text",
            "length must be between 1 and 2000 characters",
            format!("{length} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn engine_in(dir: &tempfile::TempDir) -> MemoryEngine {
        MemoryEngine::new(EngramConfig::new(dir.path())).unwrap()
    }

    #[tokio::test]
    async fn test_record_and_retrieve_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .record_interaction(
                "how do rust lifetimes work",
                "lifetimes tie borrows to scopes",
                None,
            )
            .await
            .unwrap();
        engine
            .record_interaction("what should I cook tonight", "try a stir fry", None)
            .await
            .unwrap();

        let ranked = engine
            .retrieve_relevant("rust lifetimes and borrows", None)
            .await;

        assert!(!ranked.is_empty());
        assert!(ranked.len() <= 5);
        assert!(ranked[0].record.text.contains("lifetimes"));
        for window in ranked.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[tokio::test]
    async fn test_recorded_interaction_is_durable() {
        let dir = tempfile::tempdir().unwrap();

        let stored_id = {
            let engine = engine_in(&dir);
            engine
                .record_interaction("persist me", "persisted", None)
                .await
                .unwrap()
                .id
        };

        // A second engine over the same directory sees the record
        let engine = engine_in(&dir);
        let records = engine.store.load().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, stored_id);
        assert!(records[0].embedding.is_some());
        assert!(records[0].priority > 0.0);
    }

    #[tokio::test]
    async fn test_encrypted_engine_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngramConfig::new(dir.path())
            .with_encryption_key("an-adequately-long-master-key-for-tests");
        let engine = MemoryEngine::new(config).unwrap();

        engine
            .record_interaction("my password is hunter2", "I'll remember that", None)
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("memory.json")).unwrap();
        assert!(!raw.contains("hunter2"));

        let ranked = engine.retrieve_relevant("what is my password", None).await;
        assert!(!ranked.is_empty());
    }

    #[tokio::test]
    async fn test_short_encryption_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngramConfig::new(dir.path()).with_encryption_key("short");

        assert!(matches!(
            MemoryEngine::new(config),
            Err(EngramError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_prompt_validation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        assert!(matches!(
            engine.record_interaction("", "response", None).await,
            Err(EngramError::Validation { .. })
        ));

        let oversized = "x".repeat(2001);
        assert!(matches!(
            engine.record_interaction(&oversized, "response", None).await,
            Err(EngramError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_conversation_context_flows_through() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);
        let conv = engine.new_conversation();

        for i in 0..12 {
            engine
                .record_interaction(
                    &format!("message {i}"),
                    &format!("response {i}"),
                    Some(conv.clone()),
                )
                .await
                .unwrap();
        }

        let context = engine.get_context(&conv).await;
        assert_eq!(context.len(), 10);
        assert_eq!(context[0].message, "message 2");

        let summary = engine.summarize_context(&conv).await.unwrap();
        assert_eq!(summary.exchange_count, 10);
    }

    #[tokio::test]
    async fn test_merge_contexts_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .record_interaction("hello from a", "hi", Some("conv_a".to_string()))
            .await
            .unwrap();
        engine
            .record_interaction("hello from b", "hi", Some("conv_b".to_string()))
            .await
            .unwrap();

        assert!(engine.merge_contexts("conv_a", "conv_b").await);
        assert!(engine.get_context("conv_a").await.is_empty());
        assert_eq!(engine.get_context("conv_b").await.len(), 2);
        assert_eq!(engine.active_conversations().await, 1);
    }

    #[tokio::test]
    async fn test_recall_similar_uses_vector_index() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .record_interaction(
                "the tokio runtime schedules async tasks",
                "yes it does",
                None,
            )
            .await
            .unwrap();

        let hits = engine
            .recall_similar("the tokio runtime schedules async tasks")
            .await;

        assert!(!hits.is_empty());
        assert!(hits[0].score > RECALL_MIN_SCORE);
    }

    #[tokio::test]
    async fn test_optimize_storage_unchanged_when_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .record_interaction("small", "record", None)
            .await
            .unwrap();

        let outcome = engine.optimize_storage(1024 * 1024).await.unwrap();
        assert!(matches!(outcome, StorageOptimization::Unchanged { .. }));
    }

    #[tokio::test]
    async fn test_optimize_storage_prunes_low_priority_first() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .record_interaction("remember my account password urgently", "stored", None)
            .await
            .unwrap();
        engine.record_interaction("ok", "sure", None).await.unwrap();
        engine.record_interaction("cool", "nice", None).await.unwrap();

        let records = engine.store.load().await;
        let critical_size = records
            .iter()
            .find(|r| r.text.contains("password"))
            .unwrap()
            .size_bytes();

        let outcome = engine.optimize_storage(critical_size + 16).await.unwrap();

        match outcome {
            StorageOptimization::Pruned { kept, dropped } => {
                assert!(kept >= 1);
                assert!(dropped >= 1);
            }
            other => panic!("expected pruning, got {other:?}"),
        }

        // The critical record survived the prune
        let remaining = engine.store.load().await;
        assert!(remaining.iter().any(|r| r.text.contains("password")));
    }

    #[tokio::test]
    async fn test_optimize_storage_compresses_before_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        let bulky = "a very compressible response body. ".repeat(200);
        engine
            .record_interaction("tell me everything", &bulky, None)
            .await
            .unwrap();

        let total: usize = engine
            .store
            .load()
            .await
            .iter()
            .map(|r| r.size_bytes())
            .sum();

        // A budget below the plain size but above the deflated size
        let outcome = engine.optimize_storage(total / 2).await.unwrap();
        assert!(matches!(outcome, StorageOptimization::Compressed { .. }));

        // Stored records still read back inflated
        let records = engine.store.load().await;
        assert_eq!(records[0].response, bulky);
    }

    #[tokio::test]
    async fn test_cache_stats_surface() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .record_interaction("cached entry", "value", None)
            .await
            .unwrap();

        let stats = engine.cache_stats().await;
        assert_eq!(stats.insertions, 1);
        assert_eq!(stats.current_items, 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown_are_clean() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine
            .record_interaction("before start", "ok", None)
            .await
            .unwrap();

        engine.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.shutdown().await;

        // Shutdown persisted the vector index
        assert!(dir.path().join("vector_index.json").exists());
        assert!(engine.tasks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_prewarm_populates_cache_from_store() {
        let dir = tempfile::tempdir().unwrap();

        {
            let engine = engine_in(&dir);
            engine
                .record_interaction("warm me up", "ok", None)
                .await
                .unwrap();
        }

        let engine = engine_in(&dir);
        engine.prewarm_cache().await;

        let stats = engine.cache_stats().await;
        assert_eq!(stats.current_items, 1);
    }
}
