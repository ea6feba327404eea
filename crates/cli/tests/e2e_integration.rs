//! End-to-end tests over a file-backed SQLite database.
//!
//! These exercise the same path the CLI commands take: open the database
//! file, classify the conversation's tiers, and run a destructive knowledge
//! rebuild across separate store handles.

use std::sync::Arc;
use storyloom_config::Config;
use storyloom_core::message::{ConversationId, Message, MessageKind, StoryId};
use storyloom_core::store::Store;
use storyloom_knowledge::RebuildEngine;
use storyloom_memory::{Tier, TierClassifier};
use storyloom_store::SqliteStore;

async fn seeded_db(dir: &tempfile::TempDir) -> (String, StoryId, ConversationId) {
    let path = dir
        .path()
        .join("storyloom.db")
        .to_string_lossy()
        .into_owned();
    let store = SqliteStore::new(&path).await.unwrap();

    let story = StoryId::from("e2e-story");
    let conversation = ConversationId::from("e2e-conv");
    store.create_conversation(&story, &conversation).await.unwrap();

    store
        .append_message(
            &conversation,
            Message::model(1, "Characters: Mira\nLocations: The Spire")
                .with_kind(MessageKind::SectionProposal),
        )
        .await
        .unwrap();
    store
        .append_message(&conversation, Message::user(2, "Continue from the Spire"))
        .await
        .unwrap();
    store
        .append_message(
            &conversation,
            Message::model(3, "Relationships:\nMira -> The Spire : located_in")
                .with_kind(MessageKind::SectionContent),
        )
        .await
        .unwrap();

    (path, story, conversation)
}

#[tokio::test]
async fn status_path_classifies_a_persisted_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _story, conversation) = seeded_db(&dir).await;

    // Reopen the file the way the status command does.
    let store = SqliteStore::new(&path).await.unwrap();
    let messages = store.messages(&conversation, None, None).await.unwrap();
    let summaries = store.summaries(&conversation).await.unwrap();
    let plan = TierClassifier::new(Config::default().memory)
        .classify(&messages, &summaries)
        .unwrap();

    assert_eq!(messages.len(), 3);
    assert!(
        plan.assignments()
            .iter()
            .all(|(_, tier)| *tier == Tier::Immediate)
    );
    assert!(!plan.has_work());
}

#[tokio::test]
async fn rebuild_path_replays_the_log_from_a_fresh_handle() {
    let dir = tempfile::tempdir().unwrap();
    let (path, story, _conversation) = seeded_db(&dir).await;

    let store = Arc::new(SqliteStore::new(&path).await.unwrap());
    let stats = RebuildEngine::new(store.clone())
        .rebuild(&story)
        .await
        .unwrap();

    assert_eq!(stats.messages_processed, 3);
    assert_eq!(stats.entities_created, 2);
    assert_eq!(stats.relationships_created, 1);

    let entities = store.entities(&story).await.unwrap();
    let mut names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Mira", "The Spire"]);
}

#[tokio::test]
async fn rebuild_discards_graph_state_the_log_no_longer_supports() {
    let dir = tempfile::tempdir().unwrap();
    let (path, story, _conversation) = seeded_db(&dir).await;

    let store = Arc::new(SqliteStore::new(&path).await.unwrap());
    let kind = storyloom_core::knowledge::EntityKind::Character;
    store
        .put_entity(storyloom_core::knowledge::Entity {
            id: storyloom_core::knowledge::entity_id(kind, "Drifted Ghost"),
            story_id: story.clone(),
            name: "Drifted Ghost".into(),
            kind,
            value: "never mentioned in the log".into(),
            version: 1,
            provenance: vec![99],
        })
        .await
        .unwrap();

    RebuildEngine::new(store.clone()).rebuild(&story).await.unwrap();

    let entities = store.entities(&story).await.unwrap();
    assert!(entities.iter().all(|e| e.name != "Drifted Ghost"));
}
