//! Per-conversation context windows
//!
//! Tracks a sliding window of recent exchanges for each conversation id,
//! independent of the record store. Sessions expire after an idle TTL and
//! can be merged when two conversations turn out to be one.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user/agent exchange inside a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    /// The user message
    pub message: String,

    /// The agent response
    pub response: String,

    /// When the exchange happened
    pub timestamp: DateTime<Utc>,
}

/// A conversation's bounded exchange history
#[derive(Debug, Clone)]
pub struct ConversationSession {
    /// Conversation id
    pub id: String,

    /// Exchanges, oldest first
    pub exchanges: Vec<Exchange>,

    /// Last time this session was touched
    pub last_updated: DateTime<Utc>,
}

/// Preview line in a context summary
#[derive(Debug, Clone)]
pub struct ExchangePreview {
    /// Message text, truncated to 100 characters
    pub message: String,

    /// When the exchange happened
    pub timestamp: DateTime<Utc>,
}

/// Digest of a conversation's current window
#[derive(Debug, Clone)]
pub struct ContextSummary {
    /// Number of exchanges in the window
    pub exchange_count: usize,

    /// Timestamp of the oldest windowed exchange
    pub first_timestamp: DateTime<Utc>,

    /// Timestamp of the newest exchange
    pub last_timestamp: DateTime<Utc>,

    /// Truncated message previews, oldest first
    pub previews: Vec<ExchangePreview>,
}

const PREVIEW_LENGTH: usize = 100;

/// Manages the sliding exchange window of every active conversation
pub struct ConversationContextManager {
    sessions: HashMap<String, ConversationSession>,
    window: usize,
    ttl: chrono::Duration,
}

impl ConversationContextManager {
    /// Create a manager keeping `window` exchanges per conversation and
    /// expiring sessions idle longer than `ttl`
    pub fn new(window: usize, ttl: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            window,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(30)),
        }
    }

    /// Generate a fresh conversation id
    pub fn generate_id() -> String {
        format!("conv_{}", uuid::Uuid::new_v4())
    }

    /// Append an exchange, creating the session on first use
    ///
    /// The window trims from the head: oldest exchanges are dropped first.
    pub fn append(&mut self, id: &str, message: impl Into<String>, response: impl Into<String>) {
        let now = Utc::now();
        let session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| ConversationSession {
                id: id.to_string(),
                exchanges: Vec::new(),
                last_updated: now,
            });

        session.exchanges.push(Exchange {
            message: message.into(),
            response: response.into(),
            timestamp: now,
        });

        if session.exchanges.len() > self.window {
            let excess = session.exchanges.len() - self.window;
            session.exchanges.drain(..excess);
        }

        session.last_updated = now;
        tracing::debug!(
            conversation_id = %id,
            context_size = session.exchanges.len(),
            "Context updated"
        );
    }

    /// The conversation's windowed exchanges, oldest first
    ///
    /// Returns an empty list for unknown ids. Reading refreshes the idle
    /// timer.
    pub fn get(&mut self, id: &str) -> Vec<Exchange> {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.last_updated = Utc::now();
                session.exchanges.clone()
            }
            None => Vec::new(),
        }
    }

    /// Summarize a conversation's window, or None when it has no exchanges
    pub fn summarize(&mut self, id: &str) -> Option<ContextSummary> {
        let exchanges = self.get(id);
        let (first, last) = match (exchanges.first(), exchanges.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return None,
        };

        let previews = exchanges
            .iter()
            .map(|exchange| {
                let mut message: String = exchange.message.chars().take(PREVIEW_LENGTH).collect();
                if exchange.message.chars().count() > PREVIEW_LENGTH {
                    message.push_str("...");
                }
                ExchangePreview {
                    message,
                    timestamp: exchange.timestamp,
                }
            })
            .collect();

        Some(ContextSummary {
            exchange_count: exchanges.len(),
            first_timestamp: first,
            last_timestamp: last,
            previews,
        })
    }

    /// Merge `source` into `target`, deleting `source`
    ///
    /// The merged history is ordered by timestamp and trimmed to the window.
    /// Fails when either conversation is absent or empty.
    pub fn merge(&mut self, source: &str, target: &str) -> bool {
        let source_exchanges = self.get(source);
        let target_exchanges = self.get(target);

        if source_exchanges.is_empty() || target_exchanges.is_empty() {
            tracing::warn!(
                source = %source,
                target = %target,
                "Cannot merge contexts - one or both contexts missing"
            );
            return false;
        }

        let mut merged: Vec<Exchange> = target_exchanges
            .into_iter()
            .chain(source_exchanges)
            .collect();
        merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if merged.len() > self.window {
            let excess = merged.len() - self.window;
            merged.drain(..excess);
        }

        let exchange_count = merged.len();
        self.sessions.insert(
            target.to_string(),
            ConversationSession {
                id: target.to_string(),
                exchanges: merged,
                last_updated: Utc::now(),
            },
        );
        self.sessions.remove(source);

        tracing::info!(
            source = %source,
            target = %target,
            exchange_count,
            "Contexts merged"
        );
        true
    }

    /// Delete sessions idle longer than the TTL, returning how many
    pub fn sweep_expired(&mut self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.last_updated >= cutoff);
        let cleaned = before - self.sessions.len();

        if cleaned > 0 {
            tracing::info!(count = cleaned, "Cleaned expired contexts");
        }
        cleaned
    }

    /// Number of live sessions
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30 * 60);

    #[test]
    fn test_window_keeps_last_exchanges_in_order() {
        let mut manager = ConversationContextManager::new(10, TTL);

        for i in 0..12 {
            manager.append("conv_a", format!("message {i}"), format!("response {i}"));
        }

        let exchanges = manager.get("conv_a");
        assert_eq!(exchanges.len(), 10);
        assert_eq!(exchanges[0].message, "message 2");
        assert_eq!(exchanges[9].message, "message 11");
        for window in exchanges.windows(2) {
            assert!(window[0].timestamp <= window[1].timestamp);
        }
    }

    #[test]
    fn test_unknown_conversation_is_empty() {
        let mut manager = ConversationContextManager::new(10, TTL);
        assert!(manager.get("conv_missing").is_empty());
    }

    #[test]
    fn test_generate_id_shape_and_uniqueness() {
        let a = ConversationContextManager::generate_id();
        let b = ConversationContextManager::generate_id();

        assert!(a.starts_with("conv_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_merge_combines_sorts_and_deletes_source() {
        let mut manager = ConversationContextManager::new(10, TTL);

        manager.append("conv_a", "a1", "r");
        manager.append("conv_b", "b1", "r");
        manager.append("conv_a", "a2", "r");

        assert!(manager.merge("conv_a", "conv_b"));

        let merged = manager.get("conv_b");
        assert_eq!(merged.len(), 3);
        for window in merged.windows(2) {
            assert!(window[0].timestamp <= window[1].timestamp);
        }
        assert!(manager.get("conv_a").is_empty());
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn test_merge_respects_window() {
        let mut manager = ConversationContextManager::new(4, TTL);

        for i in 0..3 {
            manager.append("conv_a", format!("a{i}"), "r");
        }
        for i in 0..3 {
            manager.append("conv_b", format!("b{i}"), "r");
        }

        assert!(manager.merge("conv_a", "conv_b"));
        assert_eq!(manager.get("conv_b").len(), 4);
    }

    #[test]
    fn test_merge_fails_on_missing_side() {
        let mut manager = ConversationContextManager::new(10, TTL);
        manager.append("conv_a", "hello", "hi");

        assert!(!manager.merge("conv_a", "conv_missing"));
        assert!(!manager.merge("conv_missing", "conv_a"));
        // The existing conversation is untouched by the failed merges
        assert_eq!(manager.get("conv_a").len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_idle_sessions() {
        let mut manager = ConversationContextManager::new(10, TTL);
        manager.append("conv_fresh", "hello", "hi");
        manager.append("conv_idle", "hello", "hi");

        manager
            .sessions
            .get_mut("conv_idle")
            .unwrap()
            .last_updated = Utc::now() - chrono::Duration::hours(1);

        assert_eq!(manager.sweep_expired(), 1);
        assert_eq!(manager.active_count(), 1);
        assert!(!manager.get("conv_fresh").is_empty());
    }

    #[test]
    fn test_summarize_truncates_previews() {
        let mut manager = ConversationContextManager::new(10, TTL);
        let long_message = "x".repeat(150);
        manager.append("conv_a", long_message, "ok");

        let summary = manager.summarize("conv_a").unwrap();
        assert_eq!(summary.exchange_count, 1);
        assert_eq!(summary.previews[0].message.len(), 103);
        assert!(summary.previews[0].message.ends_with("..."));

        assert!(manager.summarize("conv_missing").is_none());
    }
}
