//! In-memory store — `HashMap`s behind a `tokio::sync::RwLock`.
//!
//! Used by tests and ephemeral sessions. Enforces the same contract as the
//! SQLite backend so the engine cannot tell them apart.

use async_trait::async_trait;
use std::collections::HashMap;
use storyloom_core::error::StoreError;
use storyloom_core::knowledge::{Entity, Relationship};
use storyloom_core::message::{ConversationId, Message, StoryId};
use storyloom_core::store::Store;
use storyloom_core::summary::SummaryRecord;
use tokio::sync::RwLock;

#[derive(Default)]
struct ConversationRecord {
    story_id: StoryId,
    custom_prompt: Option<String>,
    messages: Vec<Message>,
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, ConversationRecord>,
    /// story id -> active conversation id
    story_index: HashMap<String, String>,
    /// summary id -> record
    summaries: HashMap<String, SummaryRecord>,
    /// (story id, entity id) -> entity
    entities: HashMap<(String, String), Entity>,
    relationships: HashMap<(String, String), Relationship>,
}

impl Inner {
    fn conversation(&self, id: &ConversationId) -> Result<&ConversationRecord, StoreError> {
        self.conversations
            .get(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))
    }

    fn conversation_mut(
        &mut self,
        id: &ConversationId,
    ) -> Result<&mut ConversationRecord, StoreError> {
        self.conversations
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))
    }
}

/// A fully in-process [`Store`].
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_conversation(
        &self,
        story: &StoryId,
        conversation: &ConversationId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.conversations.contains_key(conversation.as_str()) {
            return Err(StoreError::Storage(format!(
                "conversation {conversation} already exists"
            )));
        }
        inner.conversations.insert(
            conversation.as_str().to_string(),
            ConversationRecord {
                story_id: story.clone(),
                custom_prompt: None,
                messages: Vec::new(),
            },
        );
        inner
            .story_index
            .insert(story.as_str().to_string(), conversation.as_str().to_string());
        Ok(())
    }

    async fn conversation_exists(
        &self,
        conversation: &ConversationId,
    ) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.conversations.contains_key(conversation.as_str()))
    }

    async fn conversation_for_story(
        &self,
        story: &StoryId,
    ) -> Result<Option<ConversationId>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .story_index
            .get(story.as_str())
            .map(|id| ConversationId::from(id.as_str())))
    }

    async fn story_for_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<StoryId>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .get(conversation.as_str())
            .map(|record| record.story_id.clone()))
    }

    async fn custom_prompt(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.conversation(conversation)?.custom_prompt.clone())
    }

    async fn set_custom_prompt(
        &self,
        conversation: &ConversationId,
        prompt: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.conversation_mut(conversation)?.custom_prompt = prompt;
        Ok(())
    }

    async fn append_message(
        &self,
        conversation: &ConversationId,
        message: Message,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.conversation_mut(conversation)?;
        let last = record.messages.last().map(|m| m.ordinal).unwrap_or(0);
        if message.ordinal <= last {
            return Err(StoreError::Storage(format!(
                "non-monotonic ordinal {} after {} in {conversation}",
                message.ordinal, last
            )));
        }
        record.messages.push(message);
        Ok(())
    }

    async fn messages(
        &self,
        conversation: &ConversationId,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let record = inner.conversation(conversation)?;
        let iter = record
            .messages
            .iter()
            .filter(|m| after.is_none_or(|a| m.ordinal > a))
            .cloned();
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    async fn next_ordinal(&self, conversation: &ConversationId) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        let record = inner.conversation(conversation)?;
        Ok(record.messages.last().map(|m| m.ordinal + 1).unwrap_or(1))
    }

    async fn set_message_summary(
        &self,
        conversation: &ConversationId,
        ordinal: u64,
        summary: String,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.conversation_mut(conversation)?;
        let message = record
            .messages
            .iter_mut()
            .find(|m| m.ordinal == ordinal)
            .ok_or_else(|| StoreError::NotFound(format!("message {ordinal} in {conversation}")))?;
        message.summary = Some(summary);
        Ok(())
    }

    async fn delete_messages(
        &self,
        conversation: &ConversationId,
        ordinals: &[u64],
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.conversation_mut(conversation)?;
        let before = record.messages.len();
        record.messages.retain(|m| !ordinals.contains(&m.ordinal));
        Ok(before - record.messages.len())
    }

    async fn summaries(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<SummaryRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut records: Vec<SummaryRecord> = inner
            .summaries
            .values()
            .filter(|s| s.conversation_id == *conversation)
            .cloned()
            .collect();
        records.sort_by_key(|s| s.span().map(|(lo, _)| lo).unwrap_or(u64::MAX));
        Ok(records)
    }

    async fn upsert_summary(&self, record: SummaryRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.summaries.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete_summaries(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.summaries.len();
        inner.summaries.retain(|id, _| !ids.contains(id));
        Ok(before - inner.summaries.len())
    }

    async fn entities(&self, story: &StoryId) -> Result<Vec<Entity>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .entities
            .iter()
            .filter(|((s, _), _)| s == story.as_str())
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn relationships(&self, story: &StoryId) -> Result<Vec<Relationship>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .relationships
            .iter()
            .filter(|((s, _), _)| s == story.as_str())
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn delete_knowledge(&self, story: &StoryId) -> Result<(u64, u64), StoreError> {
        let mut inner = self.inner.write().await;
        let entities_before = inner.entities.len();
        inner.entities.retain(|(s, _), _| s != story.as_str());
        let entities_removed = (entities_before - inner.entities.len()) as u64;

        let relationships_before = inner.relationships.len();
        inner.relationships.retain(|(s, _), _| s != story.as_str());
        let relationships_removed = (relationships_before - inner.relationships.len()) as u64;

        Ok((entities_removed, relationships_removed))
    }

    async fn put_entity(&self, entity: Entity) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.entities.insert(
            (entity.story_id.as_str().to_string(), entity.id.clone()),
            entity,
        );
        Ok(())
    }

    async fn put_relationship(&self, relationship: Relationship) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.relationships.insert(
            (
                relationship.story_id.as_str().to_string(),
                relationship.id.clone(),
            ),
            relationship,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::knowledge::{EntityKind, entity_id};
    use storyloom_core::summary::SummaryKind;

    async fn store_with_conversation() -> (InMemoryStore, StoryId, ConversationId) {
        let store = InMemoryStore::new();
        let story = StoryId::from("s1");
        let conversation = ConversationId::from("c1");
        store.create_conversation(&story, &conversation).await.unwrap();
        (store, story, conversation)
    }

    #[tokio::test]
    async fn conversation_lifecycle() {
        let (store, story, conversation) = store_with_conversation().await;
        assert!(store.conversation_exists(&conversation).await.unwrap());
        assert_eq!(
            store.conversation_for_story(&story).await.unwrap(),
            Some(conversation.clone())
        );

        let err = store
            .create_conversation(&story, &conversation)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[tokio::test]
    async fn append_rejects_non_monotonic_ordinals() {
        let (store, _, conversation) = store_with_conversation().await;
        store
            .append_message(&conversation, Message::user(1, "one"))
            .await
            .unwrap();
        store
            .append_message(&conversation, Message::model(2, "two"))
            .await
            .unwrap();

        let err = store
            .append_message(&conversation, Message::user(2, "again"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
        assert_eq!(store.next_ordinal(&conversation).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn messages_support_pagination() {
        let (store, _, conversation) = store_with_conversation().await;
        for i in 1..=10 {
            store
                .append_message(&conversation, Message::user(i, format!("m{i}")))
                .await
                .unwrap();
        }

        let page = store
            .messages(&conversation, Some(3), Some(4))
            .await
            .unwrap();
        let ordinals: Vec<u64> = page.iter().map(|m| m.ordinal).collect();
        assert_eq!(ordinals, vec![4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn summary_upsert_replaces_by_id() {
        let (store, _, conversation) = store_with_conversation().await;
        let mut record = SummaryRecord::new(
            conversation.clone(),
            SummaryKind::Consolidated,
            "first fold",
            vec![1, 2],
        );
        store.upsert_summary(record.clone()).await.unwrap();

        record.content = "second fold".into();
        record.source_ordinals = vec![1, 2, 3, 4];
        store.upsert_summary(record.clone()).await.unwrap();

        let summaries = store.summaries(&conversation).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].content, "second fold");

        assert_eq!(
            store.delete_summaries(&[record.id.clone()]).await.unwrap(),
            1
        );
        assert!(store.summaries(&conversation).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_knowledge_is_scoped_and_idempotent() {
        let (store, story, _) = store_with_conversation().await;
        let other = StoryId::from("s2");
        for (s, name) in [(&story, "Mira"), (&story, "Brann"), (&other, "Kept")] {
            store
                .put_entity(Entity {
                    id: entity_id(EntityKind::Character, name),
                    story_id: s.clone(),
                    name: name.into(),
                    kind: EntityKind::Character,
                    value: String::new(),
                    version: 1,
                    provenance: vec![1],
                })
                .await
                .unwrap();
        }

        let (entities, relationships) = store.delete_knowledge(&story).await.unwrap();
        assert_eq!((entities, relationships), (2, 0));
        assert_eq!(store.entities(&other).await.unwrap().len(), 1);

        // Deleting an already-empty graph succeeds with zeros.
        assert_eq!(store.delete_knowledge(&story).await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn message_summary_and_deletion() {
        let (store, _, conversation) = store_with_conversation().await;
        for i in 1..=4 {
            store
                .append_message(&conversation, Message::user(i, format!("m{i}")))
                .await
                .unwrap();
        }
        store
            .set_message_summary(&conversation, 2, "condensed".into())
            .await
            .unwrap();
        let messages = store.messages(&conversation, None, None).await.unwrap();
        assert_eq!(messages[1].summary.as_deref(), Some("condensed"));

        assert_eq!(
            store.delete_messages(&conversation, &[2, 3]).await.unwrap(),
            2
        );
        let remaining: Vec<u64> = store
            .messages(&conversation, None, None)
            .await
            .unwrap()
            .iter()
            .map(|m| m.ordinal)
            .collect();
        assert_eq!(remaining, vec![1, 4]);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .messages(&ConversationId::from("nope"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
