//! Destructive knowledge rebuild — delete everything, replay the log.
//!
//! The rebuild is the consistency escape hatch: when the incremental graph
//! has drifted, it deletes the story's entire graph and re-derives it from
//! the raw message log. Deletion must complete before any replay begins, so
//! a failed delete aborts the rebuild with nothing replayed.
//!
//! At most one rebuild per story runs at a time; a second request fails
//! fast with a concurrency error instead of interleaving.

use crate::extractor::KnowledgeExtractor;
use crate::graph::GraphState;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use storyloom_core::error::{ConcurrencyError, Error};
use storyloom_core::message::StoryId;
use storyloom_core::store::Store;
use tracing::{debug, info, warn};

/// Where a story's rebuild currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    Idle,
    Deleting,
    Replaying,
    Done,
    Failed,
}

/// The outcome of a completed rebuild.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildStats {
    pub entities_created: u64,
    pub relationships_created: u64,
    /// Messages examined during replay (knowledge-bearing or not)
    pub messages_processed: u64,
    pub duration_ms: u64,
}

/// Drives the Deleting -> Replaying state machine for one store.
pub struct RebuildEngine {
    store: Arc<dyn Store>,
    extractor: KnowledgeExtractor,
    in_flight: Mutex<HashSet<String>>,
    phases: Mutex<HashMap<String, RebuildPhase>>,
    page_size: usize,
}

impl RebuildEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            extractor: KnowledgeExtractor::default(),
            in_flight: Mutex::new(HashSet::new()),
            phases: Mutex::new(HashMap::new()),
            page_size: 256,
        }
    }

    /// Use a non-default extractor (e.g. with a fuzzier matcher).
    pub fn with_extractor(mut self, extractor: KnowledgeExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replay pagination size (builder-style).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The story's current rebuild phase.
    pub fn phase(&self, story: &StoryId) -> RebuildPhase {
        self.phases
            .lock()
            .ok()
            .and_then(|p| p.get(story.as_str()).copied())
            .unwrap_or(RebuildPhase::Idle)
    }

    /// Whether a rebuild is currently running for the story. The turn
    /// engine consults this to reject chat turns mid-rebuild.
    pub fn is_rebuilding(&self, story: &StoryId) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(story.as_str()))
            .unwrap_or(false)
    }

    /// Rebuild the story's knowledge graph from its message log.
    pub async fn rebuild(&self, story: &StoryId) -> Result<RebuildStats, Error> {
        let _guard = self.begin(story)?;
        info!(story = %story, "Knowledge rebuild starting");

        let started = Instant::now();
        let result = self.run(story).await;
        match &result {
            Ok(stats) => {
                self.set_phase(story, RebuildPhase::Done);
                info!(
                    story = %story,
                    entities = stats.entities_created,
                    relationships = stats.relationships_created,
                    messages = stats.messages_processed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Knowledge rebuild complete"
                );
            }
            Err(e) => {
                self.set_phase(story, RebuildPhase::Failed);
                warn!(story = %story, error = %e, "Knowledge rebuild failed");
            }
        }
        result.map(|mut stats| {
            stats.duration_ms = started.elapsed().as_millis() as u64;
            stats
        })
    }

    async fn run(&self, story: &StoryId) -> Result<RebuildStats, Error> {
        // Delete must fully complete before replay: partial deletion
        // followed by replay would duplicate or corrupt entities.
        self.set_phase(story, RebuildPhase::Deleting);
        let (entities_dropped, relationships_dropped) =
            self.store.delete_knowledge(story).await?;
        debug!(
            story = %story,
            entities_dropped,
            relationships_dropped,
            "Existing graph deleted"
        );

        self.set_phase(story, RebuildPhase::Replaying);
        let mut stats = RebuildStats::default();
        let Some(conversation) = self.store.conversation_for_story(story).await? else {
            return Ok(stats);
        };

        let mut state = GraphState::empty(story.clone());
        let mut after: Option<u64> = None;
        loop {
            let page = self
                .store
                .messages(&conversation, after, Some(self.page_size))
                .await?;
            let Some(last) = page.last() else { break };
            after = Some(last.ordinal);
            let page_len = page.len();

            for message in page {
                stats.messages_processed += 1;
                if !message.kind.carries_knowledge() {
                    continue;
                }
                let extraction = self.extractor.extract(
                    &message,
                    &state.entities(),
                    &state.relationships(),
                );
                if extraction.is_empty() {
                    continue;
                }
                let outcome = state.apply(&extraction)?;
                stats.entities_created += outcome.entities_created;
                stats.relationships_created += outcome.relationships_created;
                for entity in outcome.changed_entities {
                    self.store.put_entity(entity).await?;
                }
                for relationship in outcome.changed_relationships {
                    self.store.put_relationship(relationship).await?;
                }
            }

            if page_len < self.page_size {
                break;
            }
        }

        Ok(stats)
    }

    fn begin(&self, story: &StoryId) -> Result<RebuildGuard<'_>, Error> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| Error::Internal("rebuild registry poisoned".into()))?;
        if !in_flight.insert(story.as_str().to_string()) {
            return Err(ConcurrencyError::RebuildInFlight {
                story: story.as_str().to_string(),
            }
            .into());
        }
        Ok(RebuildGuard {
            engine: self,
            story: story.as_str().to_string(),
        })
    }

    fn set_phase(&self, story: &StoryId, phase: RebuildPhase) {
        if let Ok(mut phases) = self.phases.lock() {
            phases.insert(story.as_str().to_string(), phase);
        }
    }
}

/// Releases the per-story slot when the rebuild ends, however it ends.
struct RebuildGuard<'a> {
    engine: &'a RebuildEngine,
    story: String,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.engine.in_flight.lock() {
            in_flight.remove(&self.story);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::knowledge::{Entity, EntityKind, entity_id};
    use storyloom_core::message::{ConversationId, Message, MessageKind};
    use storyloom_store::InMemoryStore;

    async fn seeded(messages: Vec<Message>) -> (Arc<InMemoryStore>, StoryId) {
        let store = Arc::new(InMemoryStore::new());
        let story = StoryId::from("s1");
        let conversation = ConversationId::from("c1");
        store.create_conversation(&story, &conversation).await.unwrap();
        for m in messages {
            store.append_message(&conversation, m).await.unwrap();
        }
        (store, story)
    }

    fn section(ordinal: u64, content: &str) -> Message {
        Message::model(ordinal, content).with_kind(MessageKind::SectionContent)
    }

    #[tokio::test]
    async fn rebuild_without_section_messages_yields_empty_graph() {
        let (store, story) = seeded(vec![
            Message::user(1, "hello"),
            Message::model(2, "well met"),
        ])
        .await;
        let engine = RebuildEngine::new(store.clone());

        let stats = engine.rebuild(&story).await.unwrap();
        assert_eq!(stats.entities_created, 0);
        assert_eq!(stats.relationships_created, 0);
        assert_eq!(stats.messages_processed, 2);
        assert!(store.entities(&story).await.unwrap().is_empty());
        assert!(store.relationships(&story).await.unwrap().is_empty());
        assert_eq!(engine.phase(&story), RebuildPhase::Done);
    }

    #[tokio::test]
    async fn rebuild_replays_sections_in_order() {
        let (store, story) = seeded(vec![
            section(1, "Canon:\nMira | character | a cartographer"),
            Message::user(2, "go on"),
            section(
                3,
                "Characters: Mira, Brann\nRelationships:\nMira -> Brann : rival",
            ),
        ])
        .await;
        let engine = RebuildEngine::new(store.clone());

        let stats = engine.rebuild(&story).await.unwrap();
        assert_eq!(stats.entities_created, 2);
        assert_eq!(stats.relationships_created, 1);
        assert_eq!(stats.messages_processed, 3);

        let entities = store.entities(&story).await.unwrap();
        let mira = entities.iter().find(|e| e.name == "Mira").unwrap();
        // Created at 1, re-mentioned at 3.
        assert_eq!(mira.version, 2);
        assert_eq!(mira.value, "a cartographer");
        assert_eq!(mira.provenance, vec![1, 3]);
    }

    #[tokio::test]
    async fn rebuild_is_deterministic() {
        let (store, story) = seeded(vec![
            section(1, "Title: Arrival\nCharacters: Mira, Brann"),
            section(2, "Canon:\nBrann | character | a smuggler"),
            section(3, "Relationships:\nMira -> Brann : ally"),
        ])
        .await;
        let engine = RebuildEngine::new(store.clone());

        engine.rebuild(&story).await.unwrap();
        let mut first_entities = store.entities(&story).await.unwrap();
        let mut first_relationships = store.relationships(&story).await.unwrap();

        engine.rebuild(&story).await.unwrap();
        let mut second_entities = store.entities(&story).await.unwrap();
        let mut second_relationships = store.relationships(&story).await.unwrap();

        for list in [&mut first_entities, &mut second_entities] {
            list.sort_by(|a, b| a.id.cmp(&b.id));
        }
        for list in [&mut first_relationships, &mut second_relationships] {
            list.sort_by(|a, b| a.id.cmp(&b.id));
        }
        assert_eq!(first_entities, second_entities);
        assert_eq!(first_relationships, second_relationships);
    }

    #[tokio::test]
    async fn rebuild_discards_drifted_state() {
        let (store, story) = seeded(vec![section(1, "Characters: Mira")]).await;
        // A stray row the log never produced.
        store
            .put_entity(Entity {
                id: entity_id(EntityKind::Character, "Impostor"),
                story_id: story.clone(),
                name: "Impostor".into(),
                kind: EntityKind::Character,
                value: String::new(),
                version: 7,
                provenance: vec![99],
            })
            .await
            .unwrap();

        let engine = RebuildEngine::new(store.clone());
        engine.rebuild(&story).await.unwrap();

        let entities = store.entities(&story).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "Mira");
        assert_eq!(entities[0].version, 1);
    }

    #[tokio::test]
    async fn second_concurrent_rebuild_fails_fast() {
        let (store, story) = seeded(vec![]).await;
        let engine = RebuildEngine::new(store);

        let _guard = engine.begin(&story).unwrap();
        assert!(engine.is_rebuilding(&story));

        let err = engine.rebuild(&story).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Concurrency(ConcurrencyError::RebuildInFlight { .. })
        ));
    }

    #[tokio::test]
    async fn guard_releases_on_completion() {
        let (store, story) = seeded(vec![]).await;
        let engine = RebuildEngine::new(store);

        engine.rebuild(&story).await.unwrap();
        assert!(!engine.is_rebuilding(&story));
        // A later rebuild is allowed.
        engine.rebuild(&story).await.unwrap();
    }

    #[tokio::test]
    async fn pagination_covers_the_whole_log() {
        let mut messages: Vec<Message> = (1..=10).map(|i| Message::user(i, "chat")).collect();
        messages.push(section(11, "Characters: Late Arrival"));
        let (store, story) = seeded(messages).await;

        let engine = RebuildEngine::new(store.clone()).with_page_size(3);
        let stats = engine.rebuild(&story).await.unwrap();
        assert_eq!(stats.messages_processed, 11);
        assert_eq!(stats.entities_created, 1);
    }
}
