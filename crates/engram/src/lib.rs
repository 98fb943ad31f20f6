//! # Engram - Memory Subsystem for Conversational Agents
//!
//! Engram retrieves, ranks, caches, and durably stores short interaction
//! records ("memories") used to ground a conversational agent's replies.
//!
//! ## Components
//!
//! - **Priority**: rule-based importance classification with recency decay
//!   and composite relevance scoring
//! - **Vector**: deterministic text embeddings with cosine-similarity search
//! - **Cache**: bounded in-memory store with admission control and stats
//! - **Store**: encrypted append-only persistent record log with atomic
//!   replace-on-write
//! - **Context**: per-conversation sliding exchange windows with expiry and
//!   merge
//! - **Recovery**: pre-write backup, bounded retry, and restore-on-failure
//!   around every store mutation
//!
//! Everything is owned by a [`MemoryEngine`](engine::MemoryEngine) - an
//! explicit context object with no global state, whose maintenance tasks
//! start and stop with it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use engram::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngramConfig::new("memories")
//!     .with_encryption_key(std::env::var("ENGRAM_MASTER_KEY")?);
//! let engine = MemoryEngine::new(config)?;
//! engine.start().await;
//!
//! let conversation = engine.new_conversation();
//! engine
//!     .record_interaction(
//!         "remember my project deadline is Friday",
//!         "I'll keep that in mind.",
//!         Some(conversation.clone()),
//!     )
//!     .await?;
//!
//! for ranked in engine
//!     .retrieve_relevant("when is my deadline?", Some(&conversation))
//!     .await
//! {
//!     println!("{:.2}: {}", ranked.score, ranked.record.text);
//! }
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Encryption
//!
//! Providing a master key (32 bytes minimum) encrypts the record store at
//! rest with AES-256-GCM under a PBKDF2-derived per-write key. Without a
//! key the store runs in plaintext mode and logs a warning. A store written
//! with one key loads as empty under any other - decryption fails closed.
//!
//! ## Embeddings
//!
//! The default [`TokenHashEmbedder`](vector::TokenHashEmbedder) derives
//! deterministic pseudo-embeddings from token hashes; swap in a real model
//! through [`EmbeddingProvider`](vector::EmbeddingProvider) without touching
//! ranking logic.

#![warn(missing_docs)]

pub mod cache;
pub mod completion;
pub mod compression;
pub mod config;
pub mod context;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod priority;
pub mod record;
pub mod recovery;
pub mod store;
pub mod vector;

/// Commonly used types
pub mod prelude {
    pub use crate::cache::{CacheStats, MemoryCache};
    pub use crate::completion::{BoundedCompletion, CompletionProvider};
    pub use crate::config::EngramConfig;
    pub use crate::context::{ContextSummary, ConversationContextManager, Exchange};
    pub use crate::crypto::EncryptionCodec;
    pub use crate::engine::{MemoryEngine, StorageOptimization};
    pub use crate::error::{EngramError, EngramResult};
    pub use crate::priority::{AccessKind, PriorityLevel, PriorityScorer, RankedMemory};
    pub use crate::record::MemoryRecord;
    pub use crate::recovery::{OperationContext, RecoveryCoordinator};
    pub use crate::store::PersistentMemoryStore;
    pub use crate::vector::{Embedding, EmbeddingProvider, TokenHashEmbedder, VectorIndex};
}
