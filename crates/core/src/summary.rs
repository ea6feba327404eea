//! Summary records — the derived artifacts of tier compaction.
//!
//! A summary never replaces its source messages: the raw log is retained for
//! audit and rebuild, and the record only controls what the assembler puts in
//! front of the model.

use crate::message::ConversationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which compaction pass produced a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    /// The single running fold of the oldest tier
    Consolidated,
    /// One mid-term block of `mid_term_block_size` messages
    Block,
    /// A per-message summary of one oversized message
    Individual,
}

/// A derived summary over an ordered set of source messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Unique record ID
    pub id: String,

    /// The conversation the sources belong to
    pub conversation_id: ConversationId,

    /// Which pass produced this record
    pub kind: SummaryKind,

    /// The summary text (word-capped by the pipeline)
    pub content: String,

    /// Ordinals of the summarized messages, ascending
    pub source_ordinals: Vec<u64>,

    /// When this record was written
    pub created_at: DateTime<Utc>,
}

impl SummaryRecord {
    /// Create a new record over the given sources.
    pub fn new(
        conversation_id: ConversationId,
        kind: SummaryKind,
        content: impl Into<String>,
        mut source_ordinals: Vec<u64>,
    ) -> Self {
        source_ordinals.sort_unstable();
        source_ordinals.dedup();
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            kind,
            content: content.into(),
            source_ordinals,
            created_at: Utc::now(),
        }
    }

    /// Whether this record covers the given ordinal.
    pub fn covers(&self, ordinal: u64) -> bool {
        self.source_ordinals.binary_search(&ordinal).is_ok()
    }

    /// Oldest and newest covered ordinal, if any.
    pub fn span(&self) -> Option<(u64, u64)> {
        match (self.source_ordinals.first(), self.source_ordinals.last()) {
            (Some(&lo), Some(&hi)) => Some((lo, hi)),
            _ => None,
        }
    }
}

/// Count words the way the summary caps are measured: whitespace-separated.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate to at most `max_words` whitespace-separated words.
///
/// Used as a hard backstop after every model-produced summary so no record
/// ever exceeds its tier's configured maximum, whatever the model returns.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.trim().to_string();
    }
    words[..max_words].join(" ")
}
