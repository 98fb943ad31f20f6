//! Priority classification, decay, and relevance ranking
//!
//! Classification runs an ordered rule cascade: an exact greeting
//! short-circuits to the lowest level before anything else, an identity
//! question forces a fixed elevated level, then the tiered pattern sets are
//! tried top to bottom. Evaluation order is load-bearing - reordering the
//! table changes outcomes. Boosts (emotion, length, code, URLs) are additive
//! and applied after tier selection.
//!
//! The scorer holds only derived scalar state (memoized base priority, last
//! access, context affinity) keyed by record id, never record bodies.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::context::Exchange;
use crate::record::MemoryRecord;

const PRIORITY_DECAY_RATE: f64 = 0.1; // priority lost per day of age
const INTERACTION_BOOST: f64 = 0.5;
const EMOTION_BOOST: f64 = 0.3;
const CONTEXT_WEIGHT: f64 = 0.4;
const CODE_BOOST: f64 = 1.5;
const URL_BOOST: f64 = 0.3;

const RELEVANCE_LIMIT: usize = 5;
const RELEVANCE_THRESHOLD: f64 = 0.2;

/// Discrete importance tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PriorityLevel {
    /// Casual chat and greetings
    Low,
    /// General conversation, status updates
    Medium,
    /// Questions, commands, stated preferences
    High,
    /// Security-sensitive, personal, and scheduling content
    Critical,
}

impl PriorityLevel {
    /// Numeric base score for this tier
    pub fn score(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 3.0,
            Self::Critical => 4.0,
        }
    }
}

/// How a record was accessed, for priority bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// The record was read during retrieval
    Read,
    /// The record was written for the first time
    Write,
    /// The record was updated in place
    Modify,
}

/// Outcome of classifying a record's content
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    /// The selected tier
    pub level: PriorityLevel,

    /// Additive boost on top of the tier
    pub boost: f64,
}

impl Classification {
    /// Combined priority score
    pub fn score(&self) -> f64 {
        self.level.score() + self.boost
    }
}

/// A candidate record with its relevance score
#[derive(Debug, Clone)]
pub struct RankedMemory {
    /// The matched record
    pub record: MemoryRecord,

    /// Combined relevance score
    pub score: f64,
}

/// The conversational context a retrieval runs against
#[derive(Debug, Clone, Default)]
pub struct RetrievalContext {
    /// The active conversation, if any
    pub conversation_id: Option<String>,

    /// Recent exchanges from that conversation, oldest first
    pub exchanges: Vec<Exchange>,
}

struct ClassificationRule {
    patterns: Vec<Regex>,
    level: PriorityLevel,
    // When set, a match decides the tier alone and skips boosts
    short_circuit: bool,
}

impl ClassificationRule {
    fn matches(&self, content: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(content))
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// Rule-based classifier and relevance ranker for memory records
pub struct PriorityScorer {
    rules: Vec<ClassificationRule>,
    emotion_patterns: Vec<Regex>,
    code_pattern: Regex,
    url_pattern: Regex,
    priorities: HashMap<String, f64>,
    last_access: HashMap<String, DateTime<Utc>>,
    context_scores: HashMap<String, f64>,
}

impl Default for PriorityScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityScorer {
    /// Create a scorer with the built-in rule table
    pub fn new() -> Self {
        let rules = vec![
            // Exact greetings decide LOW alone, before anything else
            ClassificationRule {
                patterns: vec![re(
                    r"(?i)^(hi|hello|hey|bye|thanks|thank you|ok|okay|cool|nice|great|awesome)(\s|$)|^how are you",
                )],
                level: PriorityLevel::Low,
                short_circuit: true,
            },
            // Identity questions always land at HIGH
            ClassificationRule {
                patterns: vec![re(r"(?i)\b(your name|my name)\b")],
                level: PriorityLevel::High,
                short_circuit: true,
            },
            ClassificationRule {
                patterns: vec![
                    // Security and sensitive information
                    re(r"(?i)password|key|secret|important|critical"),
                    re(r"(?i)remember|don't forget|urgent"),
                    re(r"(?i)private|confidential|sensitive"),
                    // Personal information
                    re(r"(?i)phone|address|email|contact"),
                    re(r"(?i)birthday|anniversary|date"),
                    re(r"(?i)account|login|credentials"),
                    // Task-related
                    re(r"(?i)deadline|due|schedule|appointment"),
                    re(r"(?i)project|task|todo|reminder"),
                    re(r"(?i)meeting|call|conference"),
                ],
                level: PriorityLevel::Critical,
                short_circuit: false,
            },
            ClassificationRule {
                patterns: vec![
                    // Questions and inquiries
                    re(r"(?i)^(what|who|where|when|why|how)\s"),
                    re(r"(?i)^(can you )?explain|describe|tell me|show me"),
                    re(r"(?i)^(can you )?help|assist|guide|support"),
                    // Commands and requests
                    re(r"(?i)^(please|could you|would you|can you)\s"),
                    re(r"(?i)^(need to|must|should|have to)\s"),
                    re(r"(?i)^(create|update|change|modify)\s"),
                    // Learning and preferences
                    re(r"(?i)\b(prefer|like|dislike|favorite)\b.{0,20}\bis\b"),
                    re(r"(?i)\b(learn|understand|know|remember)\b.{0,20}(about|how|why|what)"),
                    re(r"(?i)\b(always|never)\b.{0,20}(do|use|have|should)"),
                ],
                level: PriorityLevel::High,
                short_circuit: false,
            },
            ClassificationRule {
                patterns: vec![
                    // General conversation
                    re(r"(?i)\b(think|feel|believe)\b.{0,20}\babout\b"),
                    re(r"(?i)\b(interesting|curious|wonder)\b.{0,20}\b(about|if|how|why|what)\b"),
                    re(r"(?i)\b(maybe|perhaps|possibly)\b.{0,20}\b(should|could|would)\b"),
                    // Status and updates
                    re(r"(?i)\b(status|progress)\b.{0,20}\bof\b"),
                    re(r"(?i)\b(working on|doing|making)\b.{0,20}\b(the|this|that|my)\b"),
                    re(r"(?i)\b(finished|completed|done)\b.{0,20}\b(with|the|this|that)\b"),
                ],
                level: PriorityLevel::Medium,
                short_circuit: false,
            },
        ];

        Self {
            rules,
            emotion_patterns: vec![
                re(r"(?i)happy|sad|angry|excited|worried|anxious|love|hate"),
                re(r"😊|😢|😠|😃|😨|😰|❤️|💔"),
                re(r"!{2,}|\?{2,}"),
            ],
            code_pattern: re(r"function|class|const|let|var|fn |impl "),
            url_pattern: re(r"https?://[^\s]+"),
            priorities: HashMap::new(),
            last_access: HashMap::new(),
            context_scores: HashMap::new(),
        }
    }

    /// Classify a record's content into a tier plus additive boosts
    pub fn classify(&self, record: &MemoryRecord) -> Classification {
        let content = record.content();

        let mut level = PriorityLevel::Low;
        for rule in &self.rules {
            if rule.matches(&content) {
                if rule.short_circuit {
                    tracing::debug!(level = ?rule.level, "Short-circuit pattern matched");
                    return Classification {
                        level: rule.level,
                        boost: 0.0,
                    };
                }
                level = rule.level;
                break;
            }
        }

        let mut boost = 0.0;

        if self.emotion_patterns.iter().any(|p| p.is_match(&content)) {
            boost += EMOTION_BOOST;
        }

        let word_count = content.split_whitespace().count();
        if word_count > 50 {
            boost += 0.2;
        }
        if word_count > 100 {
            boost += 0.3;
        }

        // Code snippets outrank their surrounding tier
        if content.contains("```") || self.code_pattern.is_match(&content) {
            boost += CODE_BOOST;
            level = level.max(PriorityLevel::Medium);
        }

        if self.url_pattern.is_match(&content) {
            boost += URL_BOOST;
        }

        tracing::debug!(
            level = ?level,
            boost,
            word_count,
            "Priority classified"
        );

        Classification { level, boost }
    }

    /// Priority lost to age, floored at zero
    pub fn decay(&self, timestamp: DateTime<Utc>) -> f64 {
        Self::decay_at(timestamp, Utc::now())
    }

    fn decay_at(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let days = (now - timestamp).num_seconds() as f64 / 86_400.0;
        (PRIORITY_DECAY_RATE * days).max(0.0)
    }

    /// Effective priority of a record right now
    ///
    /// Memoized base classification, plus a 24-hour access-recency boost
    /// decaying linearly to zero, plus accumulated context affinity, minus
    /// age decay. Never negative.
    pub fn current_priority(&mut self, record: &MemoryRecord) -> f64 {
        self.current_priority_at(record, Utc::now())
    }

    fn current_priority_at(&mut self, record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
        let base = match self.priorities.get(&record.id) {
            Some(base) => *base,
            None => {
                let base = self.classify(record).score();
                self.priorities.insert(record.id.clone(), base);
                base
            }
        };

        let mut priority = base;

        if let Some(last) = self.last_access.get(&record.id) {
            let hours = (now - *last).num_seconds() as f64 / 3_600.0;
            if hours < 24.0 {
                priority += INTERACTION_BOOST * (1.0 - hours / 24.0);
            }
        }

        let context_score = self.context_scores.get(&record.id).copied().unwrap_or(0.0);
        let decay = Self::decay_at(record.timestamp, now);

        (priority + context_score - decay).max(0.0)
    }

    /// Record an access, boosting the stored priority on writes
    ///
    /// Write and modify accesses fold the current effective priority back
    /// into the stored base, so priority under writes is monotonically
    /// non-decreasing.
    pub fn update_on_access(&mut self, record: &MemoryRecord, kind: AccessKind) {
        let current = self.current_priority(record);
        self.last_access.insert(record.id.clone(), Utc::now());

        if matches!(kind, AccessKind::Write | AccessKind::Modify) {
            self.priorities
                .insert(record.id.clone(), current + INTERACTION_BOOST);
        }

        tracing::debug!(
            record_id = %record.id,
            kind = ?kind,
            priority = ?self.priorities.get(&record.id),
            "Memory access recorded"
        );
    }

    /// Recompute a record's context-affinity score against related records
    ///
    /// Averages time proximity (24-hour exponential decay), conversation
    /// continuity, and word overlap against each other record, weighted by
    /// the context boost factor.
    pub fn update_context_score(&mut self, id: &str, related: &[MemoryRecord]) {
        let Some(memory) = related.iter().find(|m| m.id == id) else {
            return;
        };

        let memory_words: HashSet<String> = memory
            .text
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();

        let mut context_score = 0.0;
        for other in related {
            if other.id == id {
                continue;
            }

            let time_diff_ms = (memory.timestamp - other.timestamp).num_milliseconds().abs() as f64;
            let time_score = (-time_diff_ms / (24.0 * 3_600_000.0)).exp();

            let conversation_score = if memory.conversation_id.is_some()
                && memory.conversation_id == other.conversation_id
            {
                1.0
            } else {
                0.0
            };

            let other_words: HashSet<String> = other
                .text
                .to_lowercase()
                .split_whitespace()
                .map(String::from)
                .collect();
            let intersection = memory_words.intersection(&other_words).count() as f64;
            let denom = memory_words.len().max(other_words.len()).max(1) as f64;
            let similarity_score = intersection / denom;

            context_score += (time_score + conversation_score + similarity_score) / 3.0;
        }

        self.context_scores
            .insert(id.to_string(), context_score * CONTEXT_WEIGHT);
    }

    /// Order records by effective priority, highest first
    pub fn sort_by_priority(&mut self, mut records: Vec<MemoryRecord>) -> Vec<MemoryRecord> {
        let now = Utc::now();
        let mut scored: Vec<(f64, MemoryRecord)> = records
            .drain(..)
            .map(|record| {
                let priority = self.current_priority_at(&record, now);
                (priority, record)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, record)| record).collect()
    }

    /// Keep the highest-priority records that fit the byte budget
    pub fn prune_by_priority(
        &mut self,
        records: Vec<MemoryRecord>,
        max_bytes: usize,
    ) -> Vec<MemoryRecord> {
        let sorted = self.sort_by_priority(records);

        let mut kept = Vec::new();
        let mut current_size = 0usize;
        for record in sorted {
            let size = record.size_bytes();
            if current_size + size <= max_bytes {
                current_size += size;
                kept.push(record);
            } else {
                tracing::info!(
                    record_id = %record.id,
                    size,
                    "Memory pruned due to size limit"
                );
            }
        }
        kept
    }

    /// Rank candidates by relevance to a query within its context
    ///
    /// Combines shared-term overlap, shared-phrase overlap, and context
    /// similarity at fixed weights, then adds a priority-proportional boost
    /// and a flat recency boost for records under an hour old. Returns at
    /// most five results, all above the score threshold, best first.
    pub fn find_relevant(
        &self,
        query: &str,
        context: &RetrievalContext,
        candidates: &[MemoryRecord],
    ) -> Vec<RankedMemory> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let search_text = std::iter::once(query.to_string())
            .chain(context.exchanges.iter().map(|e| e.message.clone()))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let key_terms = extract_key_terms(&search_text);
        let now = Utc::now();

        let mut ranked: Vec<RankedMemory> = candidates
            .iter()
            .map(|memory| {
                let memory_text = memory.content().to_lowercase();

                let term_similarity = term_similarity(&key_terms, &memory_text);
                let phrase_similarity = phrase_similarity(&search_text, &memory_text);
                let context_similarity = context_similarity(context, memory);

                let similarity = term_similarity * 0.4
                    + phrase_similarity * 0.4
                    + context_similarity * 0.2;

                let priority_boost = memory.priority * 0.2;
                let recency_boost = if (now - memory.timestamp).num_seconds() < 3_600 {
                    0.2
                } else {
                    0.0
                };

                RankedMemory {
                    record: memory.clone(),
                    score: similarity + priority_boost + recency_boost,
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(RELEVANCE_LIMIT);
        ranked.retain(|m| m.score > RELEVANCE_THRESHOLD);
        ranked
    }
}

fn extract_key_terms(text: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "the", "is", "at", "which", "on", "a", "an", "and", "or", "but", "in", "with", "to", "for",
    ];

    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

fn term_similarity(key_terms: &[String], text: &str) -> f64 {
    let text_terms = extract_key_terms(text);
    if key_terms.is_empty() && text_terms.is_empty() {
        return 0.0;
    }

    let matches = key_terms.iter().filter(|t| text_terms.contains(t)).count() as f64;
    matches / key_terms.len().max(text_terms.len()).max(1) as f64
}

fn extract_phrases(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut phrases = Vec::new();

    for i in 0..words.len().saturating_sub(1) {
        phrases.push(format!("{} {}", words[i], words[i + 1]));
        if i + 2 < words.len() {
            phrases.push(format!("{} {} {}", words[i], words[i + 1], words[i + 2]));
        }
    }
    phrases
}

fn phrase_similarity(text1: &str, text2: &str) -> f64 {
    let phrases1 = extract_phrases(text1);
    let phrases2 = extract_phrases(text2);
    if phrases1.is_empty() && phrases2.is_empty() {
        return 0.0;
    }

    let common = phrases1.iter().filter(|p| phrases2.contains(p)).count() as f64;
    common / phrases1.len().max(phrases2.len()).max(1) as f64
}

fn context_similarity(context: &RetrievalContext, memory: &MemoryRecord) -> f64 {
    if context.exchanges.is_empty() || memory.conversation_id.is_none() {
        return 0.0;
    }

    let mut score = 0.0;

    if context.conversation_id.is_some() && context.conversation_id == memory.conversation_id {
        score += 0.5;
    }

    // Temporal proximity, decaying to zero at a 12-hour horizon
    if let Some(last) = context.exchanges.last() {
        let hours = (last.timestamp - memory.timestamp).num_milliseconds().abs() as f64 / 3_600_000.0;
        score += ((12.0 - hours) / 12.0).max(0.0) * 0.3;
    }

    let context_text: String = context
        .exchanges
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let memory_text = memory.content().to_lowercase();

    let context_keywords: Vec<&str> = context_text.split_whitespace().collect();
    let memory_keywords: Vec<&str> = memory_text.split_whitespace().collect();

    let overlap = context_keywords
        .iter()
        .filter(|k| memory_keywords.contains(k))
        .count() as f64;
    score += (overlap / context_keywords.len().max(1) as f64) * 0.4;

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(text: &str, response: &str) -> MemoryRecord {
        MemoryRecord::new(text, response)
    }

    #[test]
    fn test_sensitive_content_is_critical() {
        let scorer = PriorityScorer::new();
        let classification = scorer.classify(&record("Remember my password is 1234", ""));

        assert_eq!(classification.level, PriorityLevel::Critical);
    }

    #[test]
    fn test_greeting_short_circuits_to_low() {
        let scorer = PriorityScorer::new();

        // The !! would add an emotion boost, but greetings skip boosts
        let classification = scorer.classify(&record("hi there!!", ""));

        assert_eq!(classification.level, PriorityLevel::Low);
        assert_eq!(classification.boost, 0.0);
        assert_eq!(classification.score(), 1.0);
    }

    #[test]
    fn test_identity_question_forces_high() {
        let scorer = PriorityScorer::new();

        // Without the identity rule this would default to LOW
        let classification = scorer.classify(&record("my name is Dora", ""));

        assert_eq!(classification.level, PriorityLevel::High);
    }

    #[test]
    fn test_question_phrasing_is_high() {
        let scorer = PriorityScorer::new();
        let classification = scorer.classify(&record("what does the borrow checker enforce", ""));

        assert_eq!(classification.level, PriorityLevel::High);
    }

    #[test]
    fn test_code_content_boost_and_floor() {
        let scorer = PriorityScorer::new();
        let classification = scorer.classify(&record("```\nlet x = 5;\n```", ""));

        assert!(classification.level >= PriorityLevel::Medium);
        assert!(classification.boost >= CODE_BOOST);
    }

    #[test]
    fn test_url_and_emotion_boosts_are_additive() {
        let scorer = PriorityScorer::new();
        let plain = scorer.classify(&record("something to think about today", ""));
        let boosted = scorer.classify(&record(
            "something to think about today!! see https://example.com/post",
            "",
        ));

        assert!(boosted.boost >= plain.boost + EMOTION_BOOST + URL_BOOST);
    }

    #[test]
    fn test_decay_is_monotonic_in_age() {
        let now = Utc::now();
        let newer = PriorityScorer::decay_at(now - Duration::days(1), now);
        let older = PriorityScorer::decay_at(now - Duration::days(10), now);

        assert!(newer <= older);
        assert!((newer - PRIORITY_DECAY_RATE).abs() < 1e-9);
    }

    #[test]
    fn test_decay_never_negative() {
        let now = Utc::now();
        let future = PriorityScorer::decay_at(now + Duration::days(1), now);

        assert_eq!(future, 0.0);
    }

    #[test]
    fn test_current_priority_floors_at_zero() {
        let mut scorer = PriorityScorer::new();
        let mut old = record("ok", "");
        old.timestamp = Utc::now() - Duration::days(365);

        assert_eq!(scorer.current_priority(&old), 0.0);
    }

    #[test]
    fn test_write_access_boost_is_monotonic() {
        let mut scorer = PriorityScorer::new();
        let memory = record("please remember my project deadline", "noted");

        let before = scorer.current_priority(&memory);
        scorer.update_on_access(&memory, AccessKind::Write);
        let after_one = scorer.current_priority(&memory);
        scorer.update_on_access(&memory, AccessKind::Write);
        let after_two = scorer.current_priority(&memory);

        assert!(after_one > before);
        assert!(after_two > after_one);
    }

    #[test]
    fn test_read_access_does_not_raise_base() {
        let mut scorer = PriorityScorer::new();
        let memory = record("what is the status of the build", "");

        scorer.update_on_access(&memory, AccessKind::Read);
        let base = scorer.priorities.get(&memory.id).copied().unwrap();

        assert_eq!(base, scorer.classify(&memory).score());
    }

    #[test]
    fn test_context_score_rewards_same_conversation() {
        let mut scorer = PriorityScorer::new();
        let a = record("debugging the parser", "").with_conversation_id("conv_1");
        let b = record("parser keeps failing on input", "").with_conversation_id("conv_1");
        let related = vec![a.clone(), b.clone()];

        scorer.update_context_score(&a.id, &related);

        let score = scorer.context_scores.get(&a.id).copied().unwrap();
        assert!(score > 0.0);
    }

    #[test]
    fn test_find_relevant_caps_threshold_and_orders() {
        let scorer = PriorityScorer::new();

        let mut candidates = Vec::new();
        for i in 0..8 {
            candidates.push(
                record(
                    &format!("tokio runtime worker threads question {i}"),
                    "tokio spawns a worker pool",
                )
                .with_priority(1.0),
            );
        }
        candidates.push(record("completely unrelated gardening note", "water the roses"));

        let context = RetrievalContext::default();
        let ranked = scorer.find_relevant("tokio runtime worker threads", &context, &candidates);

        assert!(!ranked.is_empty());
        assert!(ranked.len() <= 5);
        for window in ranked.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        for m in &ranked {
            assert!(m.score > RELEVANCE_THRESHOLD);
            assert!(m.record.text.contains("tokio"));
        }
    }

    #[test]
    fn test_find_relevant_empty_candidates() {
        let scorer = PriorityScorer::new();
        let ranked =
            scorer.find_relevant("anything", &RetrievalContext::default(), &[]);

        assert!(ranked.is_empty());
    }

    #[test]
    fn test_prune_by_priority_respects_budget() {
        let mut scorer = PriorityScorer::new();
        let records = vec![
            record("remember my password for the server", "stored securely"),
            record("hello", "hi"),
            record("what time is the meeting tomorrow", "9am"),
        ];
        let budget = records.iter().map(|r| r.size_bytes()).max().unwrap() + 10;

        let kept = scorer.prune_by_priority(records, budget);

        assert!(!kept.is_empty());
        let total: usize = kept.iter().map(|r| r.size_bytes()).sum();
        assert!(total <= budget);
        // Highest-priority record survives
        assert!(kept[0].text.contains("password") || kept[0].text.contains("meeting"));
    }

    #[test]
    fn test_sort_by_priority_orders_descending() {
        let mut scorer = PriorityScorer::new();
        let low = record("ok", "sure");
        let critical = record("my account credentials need updating urgently", "done");

        let sorted = scorer.sort_by_priority(vec![low.clone(), critical.clone()]);

        assert_eq!(sorted[0].id, critical.id);
        assert_eq!(sorted[1].id, low.id);
    }
}
