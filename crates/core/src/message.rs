//! Message domain types.
//!
//! These are the core value objects that flow through the entire system:
//! the user sends a message → the turn engine appends it to the conversation
//! log → the classifier assigns it a tier → the assembler puts it (or its
//! summary) in front of the model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a story (one narrative project).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoryId(pub String);

impl StoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Default for StoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a conversation. Exactly one conversation is active
/// per story in this design.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (co-author)
    User,
    /// The language model
    Model,
}

/// The structural type of a message.
///
/// Only [`MessageKind::SectionProposal`] and [`MessageKind::SectionContent`]
/// carry the structured template sections the knowledge extractor parses;
/// every other kind is opaque narrative text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Free-form chat
    General,
    /// A proposed outline for the next story section
    SectionProposal,
    /// The written prose of a story section
    SectionContent,
    /// Structural metadata about section ordering
    SectionStructure,
    /// Directed editing commands
    Deca,
    /// A request to revise earlier prose
    RevisionRequest,
    /// System-injected bookkeeping
    System,
}

impl MessageKind {
    /// Whether the knowledge extractor has anything to parse here.
    pub fn carries_knowledge(&self) -> bool {
        matches!(
            self,
            MessageKind::SectionProposal | MessageKind::SectionContent
        )
    }
}

/// A single message in a conversation.
///
/// Identified by its ordinal: monotonic and unique within the conversation.
/// Immutable once written, except for the `summary` field which may be
/// attached later by the summarization pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the conversation log (monotonic, unique per conversation)
    pub ordinal: u64,

    /// Who sent this message
    pub role: Role,

    /// Structural type
    pub kind: MessageKind,

    /// The raw text content
    pub content: String,

    /// Per-message summary, attached when the raw content is long
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Marked important by the user — exempt from aggressive compaction
    #[serde(default)]
    pub important: bool,

    /// Timestamp
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new user message.
    pub fn user(ordinal: u64, content: impl Into<String>) -> Self {
        Self {
            ordinal,
            role: Role::User,
            kind: MessageKind::General,
            content: content.into(),
            summary: None,
            important: false,
            created_at: Utc::now(),
        }
    }

    /// Create a new model message.
    pub fn model(ordinal: u64, content: impl Into<String>) -> Self {
        Self {
            ordinal,
            role: Role::Model,
            kind: MessageKind::General,
            content: content.into(),
            summary: None,
            important: false,
            created_at: Utc::now(),
        }
    }

    /// Set the structural kind (builder-style).
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark as important (builder-style).
    pub fn with_important(mut self, important: bool) -> Self {
        self.important = important;
        self
    }
}
