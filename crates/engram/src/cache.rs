//! Bounded in-memory record cache with usage statistics
//!
//! The cache is a read-through copy, never the authoritative store. Inserts
//! are admission-controlled: an entry that would exceed the byte budget or
//! the item budget is rejected outright rather than evicting an existing
//! entry. TTL expiry is enforced lazily on read; there is no background
//! eviction thread.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::EngramResult;
use crate::record::MemoryRecord;

/// A cached record with its accounting metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached record
    pub value: MemoryRecord,

    /// Serialized size used for byte accounting
    pub size_bytes: usize,

    /// When this entry stops being served
    pub expires_at: DateTime<Utc>,

    /// Last read of this entry
    pub last_accessed: DateTime<Utc>,
}

/// Cache usage counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Reads that found a live entry
    pub hits: u64,

    /// Reads that found nothing
    pub misses: u64,

    /// Accepted inserts
    pub insertions: u64,

    /// Inserts rejected by admission control
    pub rejections: u64,

    /// Entries dropped lazily after their TTL elapsed
    pub expirations: u64,

    /// Entries currently held
    pub current_items: usize,

    /// Bytes currently held
    pub current_size_bytes: usize,

    /// Configured item budget
    pub max_items: usize,

    /// Configured byte budget
    pub max_size_bytes: usize,
}

impl CacheStats {
    /// Fraction of reads that hit, in [0, 1]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded cache keyed by record id
pub struct MemoryCache {
    entries: HashMap<String, CacheEntry>,
    max_items: usize,
    max_bytes: usize,
    ttl: chrono::Duration,
    current_bytes: usize,
    hits: u64,
    misses: u64,
    insertions: u64,
    rejections: u64,
    expirations: u64,
}

impl MemoryCache {
    /// Create a cache with the given budgets and entry TTL
    pub fn new(max_items: usize, max_bytes: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_items,
            max_bytes,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(30)),
            current_bytes: 0,
            hits: 0,
            misses: 0,
            insertions: 0,
            rejections: 0,
            expirations: 0,
        }
    }

    /// Insert a record, returning whether it was admitted
    ///
    /// Overwriting an existing key releases that key's budget first. An
    /// insert that would exceed either budget is rejected, never evicted
    /// into.
    pub fn set(&mut self, key: impl Into<String>, value: MemoryRecord) -> bool {
        let key = key.into();
        let size = value.size_bytes();

        if let Some(previous) = self.entries.remove(&key) {
            self.current_bytes -= previous.size_bytes;
        }

        if self.current_bytes + size > self.max_bytes {
            tracing::warn!(
                key = %key,
                size,
                current_bytes = self.current_bytes,
                max_bytes = self.max_bytes,
                "Cache limit reached (size), item not added"
            );
            self.rejections += 1;
            return false;
        }
        if self.entries.len() >= self.max_items {
            tracing::warn!(
                key = %key,
                current_items = self.entries.len(),
                max_items = self.max_items,
                "Cache limit reached (items), item not added"
            );
            self.rejections += 1;
            return false;
        }

        let now = Utc::now();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                size_bytes: size,
                expires_at: now + self.ttl,
                last_accessed: now,
            },
        );
        self.current_bytes += size;
        self.insertions += 1;
        true
    }

    /// Look up a record, dropping it first if its TTL has elapsed
    pub fn get(&mut self, key: &str) -> Option<MemoryRecord> {
        if self.expire_if_stale(key) {
            self.misses += 1;
            return None;
        }

        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = Utc::now();
                self.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Whether a live entry exists for `key`
    ///
    /// Expired entries are dropped as a side effect and reported absent.
    pub fn has(&mut self, key: &str) -> bool {
        if self.expire_if_stale(key) {
            return false;
        }
        self.entries.contains_key(key)
    }

    /// Remove an entry
    pub fn delete(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.current_bytes -= entry.size_bytes;
                tracing::debug!(key = %key, "Cache item deleted");
                true
            }
            None => false,
        }
    }

    /// All live records, purging expired entries as a side effect
    pub fn get_all(&mut self) -> Vec<MemoryRecord> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| now > entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(entry) = self.entries.remove(&key) {
                self.current_bytes -= entry.size_bytes;
                self.expirations += 1;
            }
        }

        self.entries.values().map(|e| e.value.clone()).collect()
    }

    /// Read-through population: return the cached record or load and admit it
    ///
    /// Loader failures propagate to the caller; nothing is cached on error.
    pub async fn get_or_set<F, Fut>(&mut self, key: &str, loader: F) -> EngramResult<MemoryRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngramResult<MemoryRecord>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = loader().await.map_err(|e| {
            tracing::error!(key = %key, error = %e, "Cache loader failed");
            e
        })?;
        self.set(key, value.clone());
        Ok(value)
    }

    /// Insert many records, returning how many were admitted
    pub fn set_many(&mut self, items: Vec<(String, MemoryRecord)>) -> usize {
        items
            .into_iter()
            .filter(|(key, value)| self.set(key.clone(), value.clone()))
            .count()
    }

    /// Look up many keys, returning found records and the missing keys
    pub fn get_many(&mut self, keys: &[String]) -> (HashMap<String, MemoryRecord>, Vec<String>) {
        let mut found = HashMap::new();
        let mut missing = Vec::new();

        for key in keys {
            match self.get(key) {
                Some(value) => {
                    found.insert(key.clone(), value);
                }
                None => missing.push(key.clone()),
            }
        }

        (found, missing)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_bytes = 0;
        tracing::info!("Cache cleared");
    }

    /// Current usage counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            insertions: self.insertions,
            rejections: self.rejections,
            expirations: self.expirations,
            current_items: self.entries.len(),
            current_size_bytes: self.current_bytes,
            max_items: self.max_items,
            max_size_bytes: self.max_bytes,
        }
    }

    // Returns true when the key existed but had expired
    fn expire_if_stale(&mut self, key: &str) -> bool {
        let stale = match self.entries.get(key) {
            Some(entry) => Utc::now() > entry.expires_at,
            None => return false,
        };
        if stale {
            if let Some(entry) = self.entries.remove(key) {
                self.current_bytes -= entry.size_bytes;
                self.expirations += 1;
            }
        }
        stale
    }
}
