//! Summarization pipeline — turns tier-plan obligations into summary
//! records via model calls.
//!
//! Every model call goes through the retry executor and uses the cheaper
//! summarizer model. Failure never persists a partial record: the affected
//! messages stay in their prior tier state and the next turn re-plans from
//! the persisted log, so the whole pipeline is safe to re-run.

use crate::retry::RetryExecutor;
use crate::tiers::TierPlan;
use futures::future::join_all;
use std::sync::Arc;
use storyloom_config::SummaryConfig;
use storyloom_core::clock::CancelToken;
use storyloom_core::error::Error;
use storyloom_core::generator::{GenerateRequest, Generator, PromptContext, PromptMessage};
use storyloom_core::message::{ConversationId, Message, Role};
use storyloom_core::summary::{SummaryKind, SummaryRecord, truncate_words};
use storyloom_core::store::Store;
use tracing::{debug, info, warn};

/// What one pipeline run accomplished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub blocks_written: usize,
    pub consolidated_updated: bool,
    pub superseded_deleted: usize,
    pub individual_written: usize,
}

/// The model-backed compaction pipeline.
pub struct SummarizationPipeline {
    generator: Arc<dyn Generator>,
    store: Arc<dyn Store>,
    retry: RetryExecutor,
    caps: SummaryConfig,
    /// Raw length (chars) above which a message gets an individual summary
    max_message_length: usize,
    /// Cheaper summarizer model id
    model: String,
    temperature: f32,
}

impl SummarizationPipeline {
    pub fn new(
        generator: Arc<dyn Generator>,
        store: Arc<dyn Store>,
        retry: RetryExecutor,
        caps: SummaryConfig,
    ) -> Self {
        Self {
            generator,
            store,
            retry,
            caps,
            max_message_length: 1000,
            model: "loom-flash".into(),
            temperature: 0.3,
        }
    }

    /// Set the summarizer model id (builder-style).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the summarization temperature (builder-style).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the individual-summary length trigger (builder-style).
    pub fn with_max_message_length(mut self, length: usize) -> Self {
        self.max_message_length = length;
        self
    }

    /// Work through everything the plan marks due: the consolidation fold
    /// first (it moves the oldest boundary), then block summaries.
    pub async fn run(
        &self,
        conversation: &ConversationId,
        plan: &TierPlan,
        cancel: &CancelToken,
    ) -> Result<PipelineStats, Error> {
        let mut stats = PipelineStats::default();

        if !plan.consolidation_due.is_empty() {
            self.consolidate(conversation, plan, cancel).await?;
            stats.consolidated_updated = true;
            if !plan.superseded_block_ids.is_empty() {
                stats.superseded_deleted =
                    self.store.delete_summaries(&plan.superseded_block_ids).await?;
            }
        }

        if !plan.mid_term_blocks_due.is_empty() {
            stats.blocks_written = self
                .summarize_blocks(conversation, &plan.mid_term_blocks_due, cancel)
                .await?;
        }

        if stats.blocks_written > 0 || stats.consolidated_updated {
            info!(
                conversation = %conversation,
                blocks = stats.blocks_written,
                consolidated = stats.consolidated_updated,
                "Compaction pass complete"
            );
        }
        Ok(stats)
    }

    /// Produce and persist a per-message summary when the raw content is
    /// oversized. Returns the summary written, if any.
    pub async fn summarize_message(
        &self,
        conversation: &ConversationId,
        message: &Message,
        cancel: &CancelToken,
    ) -> Result<Option<String>, Error> {
        // Important messages are exempt from compaction: they stay verbatim
        // in every prompt, so a summary for them would never be used.
        if message.important
            || message.content.len() <= self.max_message_length
            || message.summary.is_some()
        {
            return Ok(None);
        }

        let prompt = individual_prompt(&message.content, self.caps.individual_max_words);
        let text = self.generate(prompt, cancel).await?;
        let summary = truncate_words(&text, self.caps.individual_max_words);

        self.store
            .set_message_summary(conversation, message.ordinal, summary.clone())
            .await?;
        debug!(ordinal = message.ordinal, "Individual summary attached");
        Ok(Some(summary))
    }

    /// Fold the due messages (plus the existing consolidated summary, if
    /// any) into a single updated consolidated record. This is a merge, not
    /// an append: the result subsumes the old summary under the same word
    /// cap.
    async fn consolidate(
        &self,
        conversation: &ConversationId,
        plan: &TierPlan,
        cancel: &CancelToken,
    ) -> Result<(), Error> {
        let existing = plan.consolidated_summary.as_ref();
        let prompt = fold_prompt(
            existing.map(|s| s.content.as_str()),
            &self.digest_lines(&plan.consolidation_due),
            self.caps.consolidated_max_words,
        );
        let text = self.generate(prompt, cancel).await?;
        let content = truncate_words(&text, self.caps.consolidated_max_words);

        let mut source_ordinals: Vec<u64> = existing
            .map(|s| s.source_ordinals.clone())
            .unwrap_or_default();
        source_ordinals.extend(plan.consolidation_due.iter().map(|m| m.ordinal));

        let mut record = SummaryRecord::new(
            conversation.clone(),
            SummaryKind::Consolidated,
            content,
            source_ordinals,
        );
        // The running consolidated summary keeps one identity across folds.
        if let Some(existing) = existing {
            record.id = existing.id.clone();
        }
        self.store.upsert_summary(record).await?;
        Ok(())
    }

    /// Summarize each due block. Generation runs concurrently (the calls
    /// share no mutated state); persistence is serialized in chronological
    /// order.
    async fn summarize_blocks(
        &self,
        conversation: &ConversationId,
        blocks: &[Vec<Message>],
        cancel: &CancelToken,
    ) -> Result<usize, Error> {
        let generations = blocks.iter().map(|block| {
            let prompt = block_prompt(&self.digest_lines(block), self.caps.block_max_words);
            async move { self.generate(prompt, cancel).await }
        });
        let results: Vec<Result<String, Error>> = join_all(generations).await;

        let mut written = 0;
        let mut first_error: Option<Error> = None;
        for (block, result) in blocks.iter().zip(results) {
            match result {
                Ok(text) => {
                    let record = SummaryRecord::new(
                        conversation.clone(),
                        SummaryKind::Block,
                        truncate_words(&text, self.caps.block_max_words),
                        block.iter().map(|m| m.ordinal).collect(),
                    );
                    self.store.upsert_summary(record).await?;
                    written += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Block summary failed; leaving block in prior tier");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) if written == 0 => Err(e),
            // Complete records were persisted; the failed block stays
            // uncovered and the next turn re-plans it.
            Some(e) => {
                warn!(error = %e, written, "Partial block pass");
                Ok(written)
            }
            None => Ok(written),
        }
    }

    async fn generate(&self, prompt: String, cancel: &CancelToken) -> Result<String, Error> {
        let request = GenerateRequest::new(
            PromptContext {
                system: SUMMARIZER_PERSONA.to_string(),
                messages: vec![PromptMessage::user(prompt)],
            },
            self.model.clone(),
        )
        .with_temperature(self.temperature);

        let outcome = self
            .retry
            .execute(cancel, || self.generator.generate(request.clone()))
            .await
            .map_err(|e| Error::Model(e.error))?;
        Ok(outcome.value)
    }

    /// Render messages for a summary prompt, preferring the individual
    /// summary of oversized messages so block and fold prompts stay bounded.
    /// Messages the user marked important stay verbatim regardless of size.
    fn digest_lines(&self, messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "User",
                    Role::Model => "Model",
                };
                let body = match &m.summary {
                    Some(summary)
                        if m.content.len() > self.max_message_length && !m.important =>
                    {
                        summary.as_str()
                    }
                    _ => m.content.as_str(),
                };
                format!("{role}: {body}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

const SUMMARIZER_PERSONA: &str =
    "You compress long-form collaborative fiction without losing established facts.";

// --- Pure prompt builders (the compression policy, testable without I/O) ---

/// Prompt for condensing one oversized message.
pub fn individual_prompt(content: &str, max_words: usize) -> String {
    format!(
        "Condense the following story message to at most {max_words} words. \
         Preserve character names, locations, and any newly established facts.\n\n{content}"
    )
}

/// Prompt for summarizing one contiguous block of messages.
pub fn block_prompt(digest: &str, max_words: usize) -> String {
    format!(
        "Summarize the following exchange from an ongoing story into a single \
         summary of at most {max_words} words. Keep character names, locations, \
         and open plot threads.\n\n{digest}"
    )
}

/// Prompt for folding the running consolidated summary with newly due
/// messages. The result must subsume the old summary — older detail is
/// compressed further, never concatenated unboundedly.
pub fn fold_prompt(existing: Option<&str>, digest: &str, max_words: usize) -> String {
    format!(
        "You maintain the running summary of a long story. Merge the existing \
         summary with the new events into one summary of at most {max_words} \
         words. Compress older details further rather than dropping \
         established facts.\n\nExisting summary:\n{}\n\nNew events:\n{digest}",
        existing.unwrap_or("(none)")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{RetryExecutor, RetryPolicy};
    use crate::tiers::TierClassifier;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use storyloom_config::MemoryConfig;
    use storyloom_core::error::ModelError;
    use storyloom_core::message::StoryId;
    use storyloom_core::summary::word_count;
    use storyloom_store::InMemoryStore;

    /// Scripted generator: returns canned text, optionally failing the
    /// first N calls with a transient error.
    struct ScriptedGenerator {
        output: String,
        fail_first: Mutex<u32>,
        calls: Mutex<u32>,
    }

    impl ScriptedGenerator {
        fn new(output: &str) -> Self {
            Self {
                output: output.into(),
                fail_first: Mutex::new(0),
                calls: Mutex::new(0),
            }
        }

        fn failing_first(output: &str, failures: u32) -> Self {
            let scripted = Self::new(output);
            *scripted.fail_first.lock().unwrap() = failures;
            scripted
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _request: GenerateRequest) -> Result<String, ModelError> {
            *self.calls.lock().unwrap() += 1;
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ModelError::Network("flaky".into()));
            }
            Ok(self.output.clone())
        }
    }

    fn fast_retry() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        })
    }

    fn pipeline(generator: Arc<dyn Generator>, store: Arc<InMemoryStore>) -> SummarizationPipeline {
        SummarizationPipeline::new(generator, store, fast_retry(), SummaryConfig::default())
    }

    async fn seeded_store(count: u64) -> (Arc<InMemoryStore>, ConversationId) {
        let store = Arc::new(InMemoryStore::new());
        let conversation = ConversationId::from("c1");
        store
            .create_conversation(&StoryId::from("s1"), &conversation)
            .await
            .unwrap();
        for i in 1..=count {
            let msg = if i % 2 == 1 {
                Message::user(i, format!("user line {i}"))
            } else {
                Message::model(i, format!("model line {i}"))
            };
            store.append_message(&conversation, msg).await.unwrap();
        }
        (store, conversation)
    }

    #[tokio::test]
    async fn thirty_messages_produce_block_and_consolidated_records() {
        let (store, conversation) = seeded_store(30).await;
        let generator = Arc::new(ScriptedGenerator::new("a tidy summary of events"));
        let pipeline = pipeline(generator.clone(), store.clone());

        let messages = store.messages(&conversation, None, None).await.unwrap();
        let plan = TierClassifier::new(MemoryConfig::default())
            .classify(&messages, &[])
            .unwrap();

        let stats = pipeline
            .run(&conversation, &plan, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(stats.blocks_written, 1);
        assert!(stats.consolidated_updated);

        let summaries = store.summaries(&conversation).await.unwrap();
        let block = summaries
            .iter()
            .find(|s| s.kind == SummaryKind::Block)
            .unwrap();
        assert_eq!(block.source_ordinals, vec![5, 6, 7, 8, 9, 10]);
        let consolidated = summaries
            .iter()
            .find(|s| s.kind == SummaryKind::Consolidated)
            .unwrap();
        assert_eq!(consolidated.source_ordinals, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn summaries_respect_word_caps() {
        let (store, conversation) = seeded_store(30).await;
        let long_output = "word ".repeat(2000);
        let generator = Arc::new(ScriptedGenerator::new(&long_output));
        let pipeline = pipeline(generator, store.clone());

        let messages = store.messages(&conversation, None, None).await.unwrap();
        let plan = TierClassifier::new(MemoryConfig::default())
            .classify(&messages, &[])
            .unwrap();
        pipeline
            .run(&conversation, &plan, &CancelToken::new())
            .await
            .unwrap();

        for summary in store.summaries(&conversation).await.unwrap() {
            let cap = match summary.kind {
                SummaryKind::Consolidated => 400,
                SummaryKind::Block => 250,
                SummaryKind::Individual => 300,
            };
            assert!(word_count(&summary.content) <= cap);
        }
    }

    #[tokio::test]
    async fn consolidation_fold_keeps_record_identity() {
        let (store, conversation) = seeded_store(30).await;
        let generator = Arc::new(ScriptedGenerator::new("folded"));
        let pipeline = pipeline(generator, store.clone());

        let messages = store.messages(&conversation, None, None).await.unwrap();
        let classifier = TierClassifier::new(MemoryConfig::default());
        let plan = classifier.classify(&messages, &[]).unwrap();
        pipeline
            .run(&conversation, &plan, &CancelToken::new())
            .await
            .unwrap();

        let first_id = store
            .summaries(&conversation)
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.kind == SummaryKind::Consolidated)
            .unwrap()
            .id;

        // Another 8 messages shift the boundaries and trigger a second fold.
        for i in 31..=38 {
            store
                .append_message(&conversation, Message::user(i, format!("line {i}")))
                .await
                .unwrap();
        }
        let messages = store.messages(&conversation, None, None).await.unwrap();
        let summaries = store.summaries(&conversation).await.unwrap();
        let plan = classifier.classify(&messages, &summaries).unwrap();
        pipeline
            .run(&conversation, &plan, &CancelToken::new())
            .await
            .unwrap();

        let consolidated: Vec<SummaryRecord> = store
            .summaries(&conversation)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.kind == SummaryKind::Consolidated)
            .collect();
        assert_eq!(consolidated.len(), 1, "the fold must replace, not append");
        assert_eq!(consolidated[0].id, first_id);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_succeed() {
        let (store, conversation) = seeded_store(30).await;
        let generator = Arc::new(ScriptedGenerator::failing_first("eventually fine", 2));
        let pipeline = pipeline(generator.clone(), store.clone());

        let messages = store.messages(&conversation, None, None).await.unwrap();
        let plan = TierClassifier::new(MemoryConfig::default())
            .classify(&messages, &[])
            .unwrap();
        let stats = pipeline
            .run(&conversation, &plan, &CancelToken::new())
            .await
            .unwrap();
        assert!(stats.consolidated_updated);
        assert!(generator.calls() > 2);
    }

    #[tokio::test]
    async fn exhausted_retries_persist_nothing() {
        let (store, conversation) = seeded_store(30).await;
        // Fails far more than max_attempts * passes.
        let generator = Arc::new(ScriptedGenerator::failing_first("unreachable", 100));
        let pipeline = pipeline(generator, store.clone());

        let messages = store.messages(&conversation, None, None).await.unwrap();
        let plan = TierClassifier::new(MemoryConfig::default())
            .classify(&messages, &[])
            .unwrap();
        let err = pipeline
            .run(&conversation, &plan, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));

        assert!(store.summaries(&conversation).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_discards_inflight_summarization() {
        let (store, conversation) = seeded_store(30).await;
        let generator = Arc::new(ScriptedGenerator::new("should not persist"));
        let pipeline = pipeline(generator, store.clone());
        let cancel = CancelToken::new();
        cancel.cancel();

        let messages = store.messages(&conversation, None, None).await.unwrap();
        let plan = TierClassifier::new(MemoryConfig::default())
            .classify(&messages, &[])
            .unwrap();
        let err = pipeline.run(&conversation, &plan, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::Cancelled)));
        assert!(store.summaries(&conversation).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_message_gets_individual_summary() {
        let (store, conversation) = seeded_store(2).await;
        let generator = Arc::new(ScriptedGenerator::new("a short digest"));
        let pipeline = pipeline(generator.clone(), store.clone()).with_max_message_length(100);

        let big = Message::user(3, "x".repeat(500));
        store.append_message(&conversation, big.clone()).await.unwrap();

        let written = pipeline
            .summarize_message(&conversation, &big, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(written.as_deref(), Some("a short digest"));

        let stored = store.messages(&conversation, Some(2), None).await.unwrap();
        assert_eq!(stored[0].summary.as_deref(), Some("a short digest"));

        // Short messages are left alone.
        let small = Message::user(4, "brief");
        store.append_message(&conversation, small.clone()).await.unwrap();
        let skipped = pipeline
            .summarize_message(&conversation, &small, &CancelToken::new())
            .await
            .unwrap();
        assert!(skipped.is_none());
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn important_messages_stay_verbatim() {
        let (store, conversation) = seeded_store(0).await;
        let generator = Arc::new(ScriptedGenerator::new("a digest"));
        let pipeline = pipeline(generator.clone(), store.clone()).with_max_message_length(20);

        let marked = Message::user(1, "the sealed vault must never be opened".repeat(3))
            .with_important(true);
        store.append_message(&conversation, marked.clone()).await.unwrap();

        // No individual summary is produced for an important message.
        let written = pipeline
            .summarize_message(&conversation, &marked, &CancelToken::new())
            .await
            .unwrap();
        assert!(written.is_none());
        assert_eq!(generator.calls(), 0);

        // Even with a summary attached, digests keep the raw text.
        let mut summarized = marked.clone();
        summarized.summary = Some("vault business".into());
        let digest = pipeline.digest_lines(std::slice::from_ref(&summarized));
        assert!(digest.contains("sealed vault"));
        assert!(!digest.contains("vault business"));

        // An unmarked oversized message with a summary uses the summary.
        summarized.important = false;
        let digest = pipeline.digest_lines(&[summarized]);
        assert!(digest.contains("vault business"));
    }

    #[test]
    fn fold_prompt_merges_old_and_new() {
        let prompt = fold_prompt(Some("the kingdom fell"), "User: a new heir appears", 400);
        assert!(prompt.contains("the kingdom fell"));
        assert!(prompt.contains("a new heir appears"));
        assert!(prompt.contains("400"));

        let fresh = fold_prompt(None, "User: once upon a time", 400);
        assert!(fresh.contains("(none)"));
    }
}
