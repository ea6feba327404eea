//! `storyloom rebuild` — delete and re-derive a story's knowledge graph.

use std::sync::Arc;
use storyloom_core::message::StoryId;
use storyloom_knowledge::RebuildEngine;
use storyloom_store::SqliteStore;

pub async fn run(
    story: &str,
    db: Option<String>,
    confirm: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !confirm {
        eprintln!("Rebuild deletes the story's entire knowledge graph, then replays");
        eprintln!("the message log from the beginning. Re-run with --confirm to proceed.");
        return Err("refusing to rebuild without --confirm".into());
    }

    let (_config, db_path) = super::resolve_db(db)?;
    let store = Arc::new(SqliteStore::new(&db_path).await?);
    let engine = RebuildEngine::new(store);
    let stats = engine.rebuild(&StoryId::from(story)).await?;

    println!("Knowledge rebuild complete for story {story}");
    println!("  Messages replayed:      {}", stats.messages_processed);
    println!("  Entities created:       {}", stats.entities_created);
    println!("  Relationships created:  {}", stats.relationships_created);
    println!("  Elapsed:                {} ms", stats.duration_ms);

    Ok(())
}
