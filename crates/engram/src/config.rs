//! Configuration for the memory subsystem

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`MemoryEngine`](crate::engine::MemoryEngine)
///
/// All persisted artifacts (record store, vector index, backups, recovery
/// log) live under `data_dir`. Encryption is enabled by providing a master
/// key of at least 32 bytes; without a key the store runs in plaintext mode
/// with a logged warning.
#[derive(Clone)]
pub struct EngramConfig {
    /// Directory holding all persisted state
    pub data_dir: PathBuf,

    /// Optional master key for encryption at rest (minimum 32 bytes)
    pub encryption_key: Option<String>,

    /// Maximum number of cache entries
    pub cache_max_items: usize,

    /// Maximum total cache size in bytes
    pub cache_max_bytes: usize,

    /// Cache entry time-to-live
    pub cache_ttl: Duration,

    /// Exchanges kept per conversation
    pub context_window: usize,

    /// Idle time before a conversation context expires
    pub context_ttl: Duration,

    /// Embedding dimensionality
    pub vector_dimensions: usize,

    /// Vector entries untouched for longer than this are pruned
    pub vector_retention: Duration,

    /// How often the vector index is persisted and pruned
    pub index_sweep_interval: Duration,

    /// How often expired conversation contexts are swept
    pub context_sweep_interval: Duration,

    /// Backups older than this are deleted by maintenance
    pub backup_max_age: Duration,

    /// Maximum attempts for a recovery-wrapped write
    pub max_write_retries: u32,

    /// Deadline for outbound completion calls
    pub completion_timeout: Duration,
}

impl EngramConfig {
    /// Create a configuration rooted at `data_dir` with default limits
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            encryption_key: None,
            cache_max_items: 1500,
            cache_max_bytes: 75 * 1024 * 1024,
            cache_ttl: Duration::from_secs(30 * 60),
            context_window: 10,
            context_ttl: Duration::from_secs(30 * 60),
            vector_dimensions: 100,
            vector_retention: Duration::from_secs(30 * 24 * 60 * 60),
            index_sweep_interval: Duration::from_secs(24 * 60 * 60),
            context_sweep_interval: Duration::from_secs(30 * 60),
            backup_max_age: Duration::from_secs(24 * 60 * 60),
            max_write_retries: 3,
            completion_timeout: Duration::from_secs(30),
        }
    }

    /// Set the encryption master key
    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    /// Set the cache budgets
    pub fn with_cache_limits(mut self, max_items: usize, max_bytes: usize) -> Self {
        self.cache_max_items = max_items;
        self.cache_max_bytes = max_bytes;
        self
    }

    /// Set the cache entry time-to-live
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the conversation window length
    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = window;
        self
    }

    /// Set the conversation idle expiry
    pub fn with_context_ttl(mut self, ttl: Duration) -> Self {
        self.context_ttl = ttl;
        self
    }

    /// Set the embedding dimensionality
    pub fn with_vector_dimensions(mut self, dimensions: usize) -> Self {
        self.vector_dimensions = dimensions;
        self
    }

    /// Set the retry budget for recovery-wrapped writes
    pub fn with_max_write_retries(mut self, retries: u32) -> Self {
        self.max_write_retries = retries;
        self
    }

    /// Set the deadline for outbound completion calls
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Path of the record store file
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("memory.json")
    }

    /// Path of the vector index file
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("vector_index.json")
    }

    /// Directory holding backups and the recovery log
    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    /// Path of the durable recovery log
    pub fn recovery_log_path(&self) -> PathBuf {
        self.backup_dir().join("recovery_state.json")
    }
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self::new("memories")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let config = EngramConfig::new("/tmp/engram-data");

        assert_eq!(config.store_path(), PathBuf::from("/tmp/engram-data/memory.json"));
        assert_eq!(
            config.recovery_log_path(),
            PathBuf::from("/tmp/engram-data/backups/recovery_state.json")
        );
    }

    #[test]
    fn test_builder_overrides() {
        let config = EngramConfig::new("data")
            .with_cache_limits(2, 1024)
            .with_context_window(5)
            .with_encryption_key("0123456789abcdef0123456789abcdef");

        assert_eq!(config.cache_max_items, 2);
        assert_eq!(config.context_window, 5);
        assert!(config.encryption_key.is_some());
    }
}
