//! Vector embeddings and similarity search
//!
//! Provides deterministic embedding generation and cosine-similarity search
//! over stored memories. The default [`TokenHashEmbedder`] derives each
//! token's vector from a cryptographic hash, so the same text always yields
//! the same embedding - reproducibility the cache and the test suite rely
//! on. A real model can be substituted through [`EmbeddingProvider`] without
//! touching ranking logic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::{EngramError, EngramResult};

/// A dense float vector over a fixed dimensionality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    /// The vector components
    pub vector: Vec<f32>,

    /// Dimensionality of the embedding
    pub dimensions: usize,
}

impl Embedding {
    /// Create a new embedding
    pub fn new(vector: Vec<f32>) -> Self {
        let dimensions = vector.len();
        Self { vector, dimensions }
    }

    /// Cosine similarity with another embedding
    ///
    /// Zero-magnitude vectors compare as 0.0 rather than dividing by zero.
    pub fn cosine_similarity(&self, other: &Embedding) -> EngramResult<f32> {
        if self.dimensions != other.dimensions {
            return Err(EngramError::validation(
                "embedding_dimensions",
                "dimensions must match",
                format!("{} vs {}", self.dimensions, other.dimensions),
            ));
        }

        let dot_product: f32 = self
            .vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| a * b)
            .sum();

        let norm_a: f32 = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = other.vector.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(0.0);
        }

        Ok(dot_product / (norm_a * norm_b))
    }
}

/// Trait for embedding generation backends
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for the given text
    async fn embed(&self, text: &str) -> EngramResult<Embedding>;

    /// Provider name
    fn name(&self) -> &str;

    /// Embedding dimensionality
    fn dimensions(&self) -> usize;
}

/// Deterministic hash-derived embedder (the default and test double)
///
/// Each distinct token maps to a fixed vector derived from its SHA-256
/// digest; a text's embedding is the L2-normalized average of its token
/// vectors. Not semantically meaningful, but stable across runs.
pub struct TokenHashEmbedder {
    dimensions: usize,
    word_vectors: std::sync::Mutex<HashMap<String, Vec<f32>>>,
}

impl TokenHashEmbedder {
    /// Create an embedder producing vectors of the given dimensionality
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            word_vectors: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn word_vector(&self, word: &str) -> Vec<f32> {
        let mut cache = self.word_vectors.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(vector) = cache.get(word) {
            return vector.clone();
        }

        let digest = Sha256::digest(word.as_bytes());
        let vector: Vec<f32> = (0..self.dimensions)
            .map(|i| (digest[i % digest.len()] as f32 - 128.0) / 128.0)
            .collect();

        cache.insert(word.to_string(), vector.clone());
        vector
    }

    fn embed_sync(&self, text: &str) -> Embedding {
        let cleaned: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();
        let words: Vec<&str> = cleaned.split_whitespace().collect();

        if words.is_empty() {
            return Embedding::new(vec![0.0; self.dimensions]);
        }

        let mut sum = vec![0.0f32; self.dimensions];
        for word in &words {
            for (acc, component) in sum.iter_mut().zip(self.word_vector(word)) {
                *acc += component;
            }
        }

        let count = words.len() as f32;
        for component in sum.iter_mut() {
            *component /= count;
        }

        let magnitude: f32 = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for component in sum.iter_mut() {
                *component /= magnitude;
            }
        }

        Embedding::new(sum)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for TokenHashEmbedder {
    async fn embed(&self, text: &str) -> EngramResult<Embedding> {
        Ok(self.embed_sync(text))
    }

    fn name(&self) -> &str {
        "token-hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// An indexed memory with its embedding and access time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorEntry {
    /// The record this entry indexes
    pub id: String,

    /// The embedding, dimension fixed at index construction
    pub embedding: Vec<f32>,

    /// Free-form metadata attached at insertion
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Last time this entry was returned by a search or touched
    pub last_accessed: chrono::DateTime<chrono::Utc>,
}

/// A search match with its similarity score
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Matched entry id
    pub id: String,

    /// Cosine similarity (higher is closer)
    pub score: f32,

    /// The matched entry's metadata
    pub metadata: HashMap<String, String>,
}

/// Options controlling a similarity search
pub struct SearchOptions<'a> {
    /// Maximum results returned
    pub top_k: usize,

    /// Minimum similarity for a result to qualify
    pub min_score: Option<f32>,

    /// Candidate predicate applied before ranking
    pub filter: Option<Box<dyn Fn(&VectorEntry) -> bool + Send + Sync + 'a>>,
}

impl Default for SearchOptions<'_> {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: None,
            filter: None,
        }
    }
}

impl<'a> SearchOptions<'a> {
    /// Set the result cap
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the minimum qualifying score
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Set the candidate filter
    pub fn with_filter(
        mut self,
        filter: impl Fn(&VectorEntry) -> bool + Send + Sync + 'a,
    ) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

/// In-memory similarity index with periodic durable persistence
pub struct VectorIndex {
    path: PathBuf,
    provider: Arc<dyn EmbeddingProvider>,
    entries: RwLock<HashMap<String, VectorEntry>>,
}

impl VectorIndex {
    /// Create an index persisted at `path`, embedding through `provider`
    pub fn new(path: impl Into<PathBuf>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            path: path.into(),
            provider,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Path of the index file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load previously persisted entries; an absent file is not an error
    pub async fn load(&self) {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Error loading vector index");
                return;
            }
        };

        match serde_json::from_slice::<HashMap<String, VectorEntry>>(&bytes) {
            Ok(loaded) => {
                let count = loaded.len();
                *self.entries.write().await = loaded;
                tracing::info!(entries = count, "Vector index loaded");
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Vector index file is malformed");
            }
        }
    }

    /// Embed `text` and index it under `id`
    pub async fn add_memory(
        &self,
        id: impl Into<String>,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> EngramResult<()> {
        let id = id.into();
        let embedding = self.provider.embed(text).await?;

        let entry = VectorEntry {
            id: id.clone(),
            embedding: embedding.vector,
            metadata,
            last_accessed: chrono::Utc::now(),
        };

        self.entries.write().await.insert(id, entry);
        Ok(())
    }

    /// Search by query text
    ///
    /// Embedding failures degrade to an empty result set with a logged
    /// error; retrieval never aborts the caller.
    pub async fn search(&self, query: &str, options: SearchOptions<'_>) -> Vec<SearchResult> {
        let query_embedding = match self.provider.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::error!(error = %e, "Vector search failed to embed query");
                return Vec::new();
            }
        };
        self.search_vector(&query_embedding, options).await
    }

    /// Search by a precomputed query vector
    pub async fn search_vector(
        &self,
        query: &Embedding,
        options: SearchOptions<'_>,
    ) -> Vec<SearchResult> {
        let entries = self.entries.read().await;

        let mut results: Vec<SearchResult> = entries
            .values()
            .filter(|entry| options.filter.as_ref().map_or(true, |f| f(entry)))
            .filter_map(|entry| {
                let candidate = Embedding::new(entry.embedding.clone());
                match query.cosine_similarity(&candidate) {
                    Ok(score) => Some(SearchResult {
                        id: entry.id.clone(),
                        score,
                        metadata: entry.metadata.clone(),
                    }),
                    Err(e) => {
                        tracing::warn!(id = %entry.id, error = %e, "Skipping entry with mismatched dimensions");
                        None
                    }
                }
            })
            .filter(|result| options.min_score.map_or(true, |min| result.score > min))
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(options.top_k);
        results
    }

    /// Refresh `last_accessed` for the given ids
    pub async fn touch(&self, ids: &[String]) {
        let now = chrono::Utc::now();
        let mut entries = self.entries.write().await;
        for id in ids {
            if let Some(entry) = entries.get_mut(id) {
                entry.last_accessed = now;
            }
        }
    }

    /// Persist the index to its file atomically
    pub async fn persist(&self) -> EngramResult<()> {
        let snapshot = { self.entries.read().await.clone() };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| EngramError::serialization("encode_vector_index", e))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngramError::storage("create_index_dir", e))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| EngramError::storage("write_vector_index", e))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| EngramError::storage("replace_vector_index", e))?;

        tracing::info!(entries = snapshot.len(), "Vector index saved");
        Ok(())
    }

    /// Drop entries not accessed within the retention horizon
    pub async fn prune(&self, retention: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - retention;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.last_accessed >= cutoff);
        before - entries.len()
    }

    /// One maintenance pass: persist, then prune stale entries
    ///
    /// Failures are logged and absorbed; the index is best-effort and must
    /// never affect the authoritative record store.
    pub async fn maintain(&self, retention: chrono::Duration) {
        if let Err(e) = self.persist().await {
            tracing::error!(error = %e, "Vector index maintenance failed to persist");
        }
        let pruned = self.prune(retention).await;
        if pruned > 0 {
            tracing::info!(pruned, "Vector index pruned stale entries");
        }
    }

    /// Number of indexed entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the index holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
