//! `storyloom status` — memory tier occupancy for one conversation.

use storyloom_core::message::ConversationId;
use storyloom_core::store::Store;
use storyloom_memory::{Tier, TierClassifier};
use storyloom_store::SqliteStore;

pub async fn run(conversation: &str, db: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let (config, db_path) = super::resolve_db(db)?;
    let store = SqliteStore::new(&db_path).await?;

    let id = ConversationId::from(conversation);
    if !store.conversation_exists(&id).await? {
        return Err(format!("conversation {conversation} not found in {db_path}").into());
    }

    let messages = store.messages(&id, None, None).await?;
    let summaries = store.summaries(&id).await?;
    let plan = TierClassifier::new(config.memory.clone()).classify(&messages, &summaries)?;

    let mut immediate = 0usize;
    let mut mid_term = 0usize;
    let mut consolidated = 0usize;
    for (_, tier) in plan.assignments() {
        match tier {
            Tier::Immediate => immediate += 1,
            Tier::MidTerm => mid_term += 1,
            Tier::Consolidated => consolidated += 1,
        }
    }

    println!("Storyloom Status");
    println!("================");
    println!("  Conversation:   {conversation}");
    println!("  Database:       {db_path}");
    println!("  Messages:       {}", messages.len());
    println!("  Immediate:      {immediate}");
    println!("  Mid-term:       {mid_term}");
    println!("  Consolidated:   {consolidated}");
    println!("  Block records:  {}", plan.mid_term_summaries.len());
    println!(
        "  Running fold:   {}",
        if plan.consolidated_summary.is_some() {
            "present"
        } else {
            "none"
        }
    );
    if plan.has_work() {
        println!(
            "\n  {} block(s) and {} message(s) are due for compaction on the next turn",
            plan.mid_term_blocks_due.len(),
            plan.consolidation_due.len()
        );
    }

    Ok(())
}
