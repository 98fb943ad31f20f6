//! Memory records - the unit of stored interaction history
//!
//! A [`MemoryRecord`] captures one user/agent exchange together with the
//! derived state (priority, embedding) attached to it over its lifetime.
//! The persistent store owns the authoritative copy; the cache may hold a
//! read-through copy keyed by id.

use serde::{Deserialize, Serialize};

/// A single stored interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Unique identifier, generated at creation
    pub id: String,

    /// The user input
    pub text: String,

    /// The agent output
    pub response: String,

    /// When this record was created
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Optional conversation this record belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Current priority score (non-negative)
    #[serde(default)]
    pub priority: f64,

    /// Fixed-dimension embedding, immutable once computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// When true, `response` holds a base64 deflate blob instead of text
    #[serde(default)]
    pub compressed: bool,
}

impl MemoryRecord {
    /// Create a new record with a fresh id and the current timestamp
    pub fn new(text: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            id: format!("mem_{}", uuid::Uuid::new_v4()),
            text: text.into(),
            response: response.into(),
            timestamp: chrono::Utc::now(),
            conversation_id: None,
            priority: 0.0,
            embedding: None,
            compressed: false,
        }
    }

    /// Attach a conversation id
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Set the priority score
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority.max(0.0);
        self
    }

    /// Attach an embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Combined searchable content (input and output together)
    pub fn content(&self) -> String {
        format!("{} {}", self.text, self.response)
    }

    /// Serialized size in bytes, used for cache accounting and pruning
    pub fn size_bytes(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ids_are_unique() {
        let a = MemoryRecord::new("hello", "hi there");
        let b = MemoryRecord::new("hello", "hi there");

        assert!(a.id.starts_with("mem_"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_record_serde_field_names() {
        let record = MemoryRecord::new("question", "answer").with_conversation_id("conv_1");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["conversationId"], "conv_1");
        assert!(json.get("conversation_id").is_none());

        let back: MemoryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.conversation_id.as_deref(), Some("conv_1"));
    }

    #[test]
    fn test_priority_floor() {
        let record = MemoryRecord::new("a", "b").with_priority(-2.5);
        assert_eq!(record.priority, 0.0);
    }
}
