//! Turn orchestration — the path a chat turn takes through the system.
//!
//! `prepare_turn` appends the user message, settles any compaction the tier
//! plan marks due, and assembles the bounded prompt. Generation itself is
//! the caller's job (the model invocation layer lives outside this
//! workspace); `record_turn_result` appends the model's reply and feeds the
//! incremental knowledge extraction.
//!
//! Failure contract: if summarization fails after the user message was
//! appended, the turn surfaces the error with the raw message preserved.
//! The caller retries the turn; no user input is lost.

use crate::lease::LeaseRegistry;
use chrono::Duration;
use std::sync::Arc;
use storyloom_config::Config;
use storyloom_core::clock::{CancelToken, Clock, SystemClock};
use storyloom_core::error::{ConcurrencyError, Error, StoreError};
use storyloom_core::generator::{Generator, PromptContext};
use storyloom_core::message::{ConversationId, Message, MessageKind, StoryId};
use storyloom_core::store::Store;
use storyloom_core::summary::SummaryKind;
use storyloom_knowledge::{GraphState, KnowledgeExtractor, RebuildEngine, RebuildStats};
use storyloom_memory::{
    AssembledStats, ContextAssembler, PipelineStats, RetryExecutor, RetryPolicy,
    SummarizationPipeline, TierClassifier, TierPlan, TtlCache,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const EXISTENCE_TTL_SECS: i64 = 60;
const LEASE_TTL_SECS: i64 = 120;

/// Everything `prepare_turn` hands back to the caller.
#[derive(Debug)]
pub struct PreparedTurn {
    /// The bounded context to put in front of the model
    pub context: PromptContext,

    /// Ordinal assigned to the appended user message
    pub user_ordinal: u64,

    pub assembled: AssembledStats,
    pub compaction: PipelineStats,
}

/// Tier occupancy for one conversation, for operator tooling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierStatus {
    pub total_messages: usize,
    pub immediate: usize,
    pub mid_term: usize,
    pub consolidated: usize,
    /// Compaction the next turn will perform
    pub pending_work: bool,
}

/// The turn orchestrator. One per process, shared across conversations.
pub struct TurnEngine {
    store: Arc<dyn Store>,
    classifier: TierClassifier,
    pipeline: SummarizationPipeline,
    assembler: ContextAssembler,
    extractor: KnowledgeExtractor,
    rebuilds: RebuildEngine,
    leases: LeaseRegistry,
    existence: TtlCache<bool>,
}

impl TurnEngine {
    pub fn new(store: Arc<dyn Store>, generator: Arc<dyn Generator>, config: &Config) -> Self {
        Self::with_clock(store, generator, config, Arc::new(SystemClock))
    }

    /// Construct with an explicit clock (tests drive lease and cache expiry).
    pub fn with_clock(
        store: Arc<dyn Store>,
        generator: Arc<dyn Generator>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let retry = RetryExecutor::new(RetryPolicy::from(&config.retry))
            .with_deadline(std::time::Duration::from_millis(config.models.call_timeout_ms));
        let pipeline = SummarizationPipeline::new(
            generator,
            store.clone(),
            retry,
            config.summaries.clone(),
        )
        .with_model(config.models.summarizer.clone())
        .with_temperature(config.models.summary_temperature)
        .with_max_message_length(config.memory.max_message_length);

        Self {
            store: store.clone(),
            classifier: TierClassifier::new(config.memory.clone()),
            pipeline,
            assembler: ContextAssembler::new(),
            extractor: KnowledgeExtractor::default(),
            rebuilds: RebuildEngine::new(store),
            leases: LeaseRegistry::new(clock.clone(), Duration::seconds(LEASE_TTL_SECS)),
            existence: TtlCache::new(Duration::seconds(EXISTENCE_TTL_SECS), clock),
        }
    }

    /// Create a conversation for a story.
    pub async fn create_conversation(&self, story: &StoryId) -> Result<ConversationId, Error> {
        let conversation = ConversationId::new();
        self.store.create_conversation(story, &conversation).await?;
        self.existence.put(conversation.as_str(), true);
        Ok(conversation)
    }

    /// Append the user's message and assemble the prompt for the reply.
    pub async fn prepare_turn(
        &self,
        conversation: &ConversationId,
        user_text: impl Into<String>,
        cancel: &CancelToken,
    ) -> Result<PreparedTurn, Error> {
        self.ensure_exists(conversation).await?;
        let story = self.story_of(conversation).await?;
        self.reject_if_rebuilding(&story)?;
        let _lease = self.lease(conversation)?;

        let user_ordinal = self.store.next_ordinal(conversation).await?;
        let message = Message::user(user_ordinal, user_text);
        self.store.append_message(conversation, message.clone()).await?;
        debug!(conversation = %conversation, ordinal = user_ordinal, "User message appended");

        self.maybe_summarize(conversation, &message, cancel).await;

        // Settle due compaction before assembling, so the context reflects
        // committed records rather than obligations.
        let plan = self.plan(conversation).await?;
        let compaction = if plan.has_work() {
            let stats = self.pipeline.run(conversation, &plan, cancel).await?;
            debug!(
                conversation = %conversation,
                blocks = stats.blocks_written,
                consolidated = stats.consolidated_updated,
                "Compaction settled before assembly"
            );
            stats
        } else {
            PipelineStats::default()
        };
        let plan = self.plan(conversation).await?;

        let custom_prompt = self.store.custom_prompt(conversation).await?;
        let entities = self.store.entities(&story).await?;
        let relationships = self.store.relationships(&story).await?;
        let (context, assembled) =
            self.assembler
                .assemble(&plan, custom_prompt.as_deref(), &entities, &relationships);

        Ok(PreparedTurn {
            context,
            user_ordinal,
            assembled,
            compaction,
        })
    }

    /// Append the model's reply. Section replies feed incremental knowledge
    /// extraction. Returns the reply's ordinal. Rejected while the story's
    /// knowledge rebuild runs; an incremental write mid-replay would be
    /// erased or double-applied.
    pub async fn record_turn_result(
        &self,
        conversation: &ConversationId,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Result<u64, Error> {
        self.ensure_exists(conversation).await?;
        let story = self.story_of(conversation).await?;
        self.reject_if_rebuilding(&story)?;
        let _lease = self.lease(conversation)?;

        let ordinal = self.store.next_ordinal(conversation).await?;
        let message = Message::model(ordinal, content).with_kind(kind);
        self.store.append_message(conversation, message.clone()).await?;

        if kind.carries_knowledge() {
            self.extract_knowledge(&story, &message).await?;
        }
        self.maybe_summarize(conversation, &message, &CancelToken::new())
            .await;

        Ok(ordinal)
    }

    /// Delete one exchange from the recent log.
    ///
    /// Deleting a model reply also removes the user message immediately
    /// before it (the prompt that produced it), when there is one. Deleting
    /// a user message likewise removes the model reply immediately after
    /// it. Messages already covered by a block or consolidated summary
    /// cannot be deleted; that would orphan the record. Rejected while the
    /// story's knowledge rebuild runs, since a rebuild replays this log.
    pub async fn delete_exchange(
        &self,
        conversation: &ConversationId,
        ordinal: u64,
    ) -> Result<Vec<u64>, Error> {
        self.ensure_exists(conversation).await?;
        let story = self.story_of(conversation).await?;
        self.reject_if_rebuilding(&story)?;
        let _lease = self.lease(conversation)?;

        let messages = self.store.messages(conversation, None, None).await?;
        let index = messages
            .iter()
            .position(|m| m.ordinal == ordinal)
            .ok_or_else(|| {
                Error::Store(StoreError::NotFound(format!(
                    "message {ordinal} in {conversation}"
                )))
            })?;

        let mut targets = vec![ordinal];
        match messages[index].role {
            storyloom_core::message::Role::Model => {
                if index > 0 && messages[index - 1].role == storyloom_core::message::Role::User {
                    targets.push(messages[index - 1].ordinal);
                }
            }
            storyloom_core::message::Role::User => {
                if let Some(next) = messages.get(index + 1) {
                    if next.role == storyloom_core::message::Role::Model {
                        targets.push(next.ordinal);
                    }
                }
            }
        }
        targets.sort_unstable();

        for summary in self.store.summaries(conversation).await? {
            if summary.kind == SummaryKind::Individual {
                continue;
            }
            for &target in &targets {
                if summary.covers(target) {
                    return Err(storyloom_core::error::ConsistencyError::SummaryWithoutSource {
                        summary_id: summary.id.clone(),
                        ordinal: target,
                    }
                    .into());
                }
            }
        }

        let removed = self.store.delete_messages(conversation, &targets).await?;
        info!(
            conversation = %conversation,
            ?targets,
            removed,
            "Exchange deleted"
        );
        Ok(targets)
    }

    /// Destructively rebuild the story's knowledge graph from its log.
    /// Chat turns for the story are rejected while this runs.
    pub async fn rebuild_knowledge(&self, story: &StoryId) -> Result<RebuildStats, Error> {
        self.rebuilds.rebuild(story).await
    }

    /// Tier occupancy for operator tooling.
    pub async fn status(&self, conversation: &ConversationId) -> Result<TierStatus, Error> {
        self.ensure_exists(conversation).await?;
        let messages = self.store.messages(conversation, None, None).await?;
        let summaries = self.store.summaries(conversation).await?;
        let plan = self.classifier.classify(&messages, &summaries)?;

        let mut status = TierStatus {
            total_messages: messages.len(),
            pending_work: plan.has_work(),
            ..TierStatus::default()
        };
        for (_, tier) in plan.assignments() {
            match tier {
                storyloom_memory::Tier::Immediate => status.immediate += 1,
                storyloom_memory::Tier::MidTerm => status.mid_term += 1,
                storyloom_memory::Tier::Consolidated => status.consolidated += 1,
            }
        }
        Ok(status)
    }

    async fn plan(&self, conversation: &ConversationId) -> Result<TierPlan, Error> {
        let messages = self.store.messages(conversation, None, None).await?;
        let summaries = self.store.summaries(conversation).await?;
        Ok(self.classifier.classify(&messages, &summaries)?)
    }

    /// Individual summaries are an optimization, not a correctness
    /// requirement: an oversized message without one simply stays verbatim,
    /// so failure here is logged and the turn continues.
    async fn maybe_summarize(
        &self,
        conversation: &ConversationId,
        message: &Message,
        cancel: &CancelToken,
    ) {
        if let Err(e) = self
            .pipeline
            .summarize_message(conversation, message, cancel)
            .await
        {
            warn!(
                conversation = %conversation,
                ordinal = message.ordinal,
                error = %e,
                "Individual summary failed; message stays verbatim"
            );
        }
    }

    async fn extract_knowledge(&self, story: &StoryId, message: &Message) -> Result<(), Error> {
        let entities = self.store.entities(story).await?;
        let relationships = self.store.relationships(story).await?;
        let extraction = self.extractor.extract(message, &entities, &relationships);
        if extraction.is_empty() {
            return Ok(());
        }

        let mut state = GraphState::from_parts(story.clone(), entities, relationships);
        let outcome = state.apply(&extraction)?;
        for entity in outcome.changed_entities {
            self.store.put_entity(entity).await?;
        }
        for relationship in outcome.changed_relationships {
            self.store.put_relationship(relationship).await?;
        }
        debug!(
            story = %story,
            ordinal = message.ordinal,
            entities_created = outcome.entities_created,
            relationships_created = outcome.relationships_created,
            "Incremental knowledge applied"
        );
        Ok(())
    }

    /// Every chat-driven path checks this before touching the log or graph:
    /// the rebuild owns both until it finishes.
    fn reject_if_rebuilding(&self, story: &StoryId) -> Result<(), Error> {
        if self.rebuilds.is_rebuilding(story) {
            return Err(ConcurrencyError::RebuildInFlight {
                story: story.as_str().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn ensure_exists(&self, conversation: &ConversationId) -> Result<(), Error> {
        if self.existence.get(conversation.as_str()) == Some(true) {
            return Ok(());
        }
        if self.store.conversation_exists(conversation).await? {
            self.existence.put(conversation.as_str(), true);
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("conversation {conversation}")).into())
        }
    }

    async fn story_of(&self, conversation: &ConversationId) -> Result<StoryId, Error> {
        self.store
            .story_for_conversation(conversation)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("story for conversation {conversation}")).into()
            })
    }

    fn lease(&self, conversation: &ConversationId) -> Result<crate::lease::LeaseGuard, Error> {
        let holder = Uuid::new_v4().to_string();
        Ok(self
            .leases
            .acquire(&format!("conversation/{conversation}"), &holder)?)
    }
}
