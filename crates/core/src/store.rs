//! Store trait — the persistence interface the engine consumes.
//!
//! The relational engine itself is an external collaborator; this trait is
//! the exact query surface the memory and knowledge components need: ordered
//! message reads, summary upserts, and story-scoped bulk knowledge
//! operations. Implementations: SQLite, in-memory (for testing).

use crate::error::StoreError;
use crate::knowledge::{Entity, Relationship};
use crate::message::{ConversationId, Message, StoryId};
use crate::summary::SummaryRecord;
use async_trait::async_trait;

#[async_trait]
pub trait Store: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    // --- Conversations ---

    /// Register a conversation for a story.
    async fn create_conversation(
        &self,
        story: &StoryId,
        conversation: &ConversationId,
    ) -> Result<(), StoreError>;

    /// Whether the conversation exists.
    async fn conversation_exists(&self, conversation: &ConversationId)
    -> Result<bool, StoreError>;

    /// The active conversation for a story, if any.
    async fn conversation_for_story(
        &self,
        story: &StoryId,
    ) -> Result<Option<ConversationId>, StoreError>;

    /// The story a conversation belongs to.
    async fn story_for_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<StoryId>, StoreError>;

    /// The per-conversation persona override, if set.
    async fn custom_prompt(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<String>, StoreError>;

    /// Set or clear the persona override.
    async fn set_custom_prompt(
        &self,
        conversation: &ConversationId,
        prompt: Option<String>,
    ) -> Result<(), StoreError>;

    // --- Messages ---

    /// Append a message. The caller assigns the ordinal; the store rejects
    /// non-monotonic appends.
    async fn append_message(
        &self,
        conversation: &ConversationId,
        message: Message,
    ) -> Result<(), StoreError>;

    /// Ordered ascending read, optionally starting after `after` and capped
    /// at `limit` rows (pagination for rebuild streaming).
    async fn messages(
        &self,
        conversation: &ConversationId,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError>;

    /// The ordinal the next appended message should receive.
    async fn next_ordinal(&self, conversation: &ConversationId) -> Result<u64, StoreError>;

    /// Attach a per-message summary (the only mutation messages allow).
    async fn set_message_summary(
        &self,
        conversation: &ConversationId,
        ordinal: u64,
        summary: String,
    ) -> Result<(), StoreError>;

    /// Delete specific messages by ordinal. Returns the number removed.
    async fn delete_messages(
        &self,
        conversation: &ConversationId,
        ordinals: &[u64],
    ) -> Result<usize, StoreError>;

    // --- Summaries ---

    /// All summary records for a conversation.
    async fn summaries(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<SummaryRecord>, StoreError>;

    /// Insert or replace a summary record by id.
    async fn upsert_summary(&self, record: SummaryRecord) -> Result<(), StoreError>;

    /// Delete summary records by id. Returns the number removed.
    async fn delete_summaries(&self, ids: &[String]) -> Result<usize, StoreError>;

    // --- Knowledge ---

    /// All entities for a story.
    async fn entities(&self, story: &StoryId) -> Result<Vec<Entity>, StoreError>;

    /// All relationships for a story.
    async fn relationships(&self, story: &StoryId) -> Result<Vec<Relationship>, StoreError>;

    /// Bulk delete of a story's entire knowledge graph, atomically.
    /// Returns (entities_removed, relationships_removed). Deleting an
    /// already-empty graph succeeds with zeros.
    async fn delete_knowledge(&self, story: &StoryId) -> Result<(u64, u64), StoreError>;

    /// Insert or replace an entity by id.
    async fn put_entity(&self, entity: Entity) -> Result<(), StoreError>;

    /// Insert or replace a relationship by id.
    async fn put_relationship(&self, relationship: Relationship) -> Result<(), StoreError>;
}
