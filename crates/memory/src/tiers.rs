//! Tier classification — partitioning the message log by fidelity.
//!
//! The classifier is pure: it reads the ordered message log plus the
//! persisted summary records and emits a [`TierPlan`] describing what is
//! Immediate, what is represented by block summaries, and what is due for
//! compaction. It runs on every turn because tier boundaries move as
//! messages append; running it twice on unchanged input yields an identical
//! plan.
//!
//! Invariant: tier boundaries are contiguous by ordinal —
//! Consolidated ≤ Mid-Term ≤ Immediate. Violations are surfaced as
//! [`ConsistencyError`], never repaired in place.

use storyloom_config::MemoryConfig;
use storyloom_core::error::ConsistencyError;
use storyloom_core::message::Message;
use storyloom_core::summary::{SummaryKind, SummaryRecord};

/// A fidelity level for representing past messages in the model context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Consolidated,
    MidTerm,
    Immediate,
}

/// The classifier's output: current tier state plus pending obligations.
#[derive(Debug, Clone, PartialEq)]
pub struct TierPlan {
    /// Most recent messages, kept verbatim in context (chronological)
    pub immediate: Vec<Message>,

    /// Contiguous chunks awaiting a block summary (chronological)
    pub mid_term_blocks_due: Vec<Vec<Message>>,

    /// Oldest messages due to be folded into the consolidated summary
    pub consolidation_due: Vec<Message>,

    /// Uncovered old messages not yet forming a full block — they wait
    pub awaiting_block: Vec<Message>,

    /// Block records still current, chronological
    pub mid_term_summaries: Vec<SummaryRecord>,

    /// The existing running consolidated summary, if any
    pub consolidated_summary: Option<SummaryRecord>,

    /// Block record ids fully subsumed once the pending fold commits
    pub superseded_block_ids: Vec<String>,
}

impl TierPlan {
    /// Whether the pipeline has anything to do for this plan.
    pub fn has_work(&self) -> bool {
        !self.mid_term_blocks_due.is_empty() || !self.consolidation_due.is_empty()
    }

    /// Planned tier for every known ordinal, ascending.
    pub fn assignments(&self) -> Vec<(u64, Tier)> {
        let mut out: Vec<(u64, Tier)> = Vec::new();
        if let Some(s) = &self.consolidated_summary {
            for &ord in &s.source_ordinals {
                out.push((ord, Tier::Consolidated));
            }
        }
        for m in &self.consolidation_due {
            out.push((m.ordinal, Tier::Consolidated));
        }
        for s in &self.mid_term_summaries {
            for &ord in &s.source_ordinals {
                out.push((ord, Tier::MidTerm));
            }
        }
        for block in &self.mid_term_blocks_due {
            for m in block {
                out.push((m.ordinal, Tier::MidTerm));
            }
        }
        for m in &self.awaiting_block {
            out.push((m.ordinal, Tier::MidTerm));
        }
        for m in &self.immediate {
            out.push((m.ordinal, Tier::Immediate));
        }
        out.sort_by_key(|(ord, _)| *ord);
        out
    }
}

/// Pure tier classifier. Holds only thresholds; no I/O.
#[derive(Debug, Clone)]
pub struct TierClassifier {
    config: MemoryConfig,
}

impl TierClassifier {
    pub fn new(config: MemoryConfig) -> Self {
        Self { config }
    }

    /// Partition `messages` (ascending ordinal) given the persisted
    /// `summaries`, producing the plan the pipeline consumes.
    pub fn classify(
        &self,
        messages: &[Message],
        summaries: &[SummaryRecord],
    ) -> Result<TierPlan, ConsistencyError> {
        for pair in messages.windows(2) {
            if pair[1].ordinal <= pair[0].ordinal {
                return Err(ConsistencyError::NonContiguousTiers {
                    detail: format!(
                        "message log not ascending: {} then {}",
                        pair[0].ordinal, pair[1].ordinal
                    ),
                });
            }
        }

        let imm_start = messages.len().saturating_sub(self.config.immediate_messages);
        let (old, immediate) = messages.split_at(imm_start);

        let consolidated_summary = summaries
            .iter()
            .find(|s| s.kind == SummaryKind::Consolidated)
            .cloned();
        let frontier = consolidated_summary
            .as_ref()
            .and_then(|s| s.span())
            .map(|(_, hi)| hi)
            .unwrap_or(0);

        let mut blocks: Vec<SummaryRecord> = summaries
            .iter()
            .filter(|s| s.kind == SummaryKind::Block)
            .cloned()
            .collect();
        blocks.sort_by_key(|s| s.span().map(|(lo, _)| lo).unwrap_or(u64::MAX));

        // A tier summary reaching into the immediate window means the window
        // moved backwards underneath persisted state.
        if let Some(first_imm) = immediate.first() {
            for s in summaries.iter().filter(|s| s.kind != SummaryKind::Individual) {
                if let Some((_, hi)) = s.span() {
                    if hi >= first_imm.ordinal {
                        return Err(ConsistencyError::NonContiguousTiers {
                            detail: format!(
                                "summary {} covers ordinal {} inside the immediate window",
                                s.id, hi
                            ),
                        });
                    }
                }
            }
        }

        let unconsolidated_old: Vec<Message> = old
            .iter()
            .filter(|m| m.ordinal > frontier)
            .cloned()
            .collect();

        // Oldest excess beyond the threshold is due for consolidation,
        // widened to whole block records so no block is split by the cut.
        let mut cut = unconsolidated_old
            .len()
            .saturating_sub(self.config.consolidation_threshold);
        if cut > 0 {
            loop {
                let last_ord = unconsolidated_old[cut - 1].ordinal;
                let straddling = blocks.iter().find_map(|b| {
                    b.span()
                        .filter(|&(lo, hi)| lo <= last_ord && hi > last_ord)
                        .map(|(_, hi)| hi)
                });
                match straddling {
                    Some(hi) => {
                        cut = unconsolidated_old
                            .iter()
                            .position(|m| m.ordinal > hi)
                            .unwrap_or(unconsolidated_old.len());
                    }
                    None => break,
                }
            }
        }
        let mut consolidation_due: Vec<Message> = unconsolidated_old[..cut].to_vec();
        let remaining = &unconsolidated_old[cut..];

        let cut_end = consolidation_due.last().map(|m| m.ordinal).unwrap_or(frontier);
        let superseded_block_ids: Vec<String> = blocks
            .iter()
            .filter(|b| b.span().is_some_and(|(_, hi)| hi <= cut_end))
            .map(|b| b.id.clone())
            .collect();

        let mid_term_summaries: Vec<SummaryRecord> = blocks
            .iter()
            .filter(|b| !superseded_block_ids.contains(&b.id))
            .cloned()
            .collect();

        let covered =
            |ord: u64| mid_term_summaries.iter().any(|b| b.covers(ord));
        let first_covered_ord = remaining.iter().find(|m| covered(m.ordinal)).map(|m| m.ordinal);

        // Uncovered messages older than any block coverage sit against the
        // consolidated frontier; uncovered ones newer than coverage wait to
        // fill a block.
        let (pre, post): (Vec<Message>, Vec<Message>) = match first_covered_ord {
            Some(fc) => (
                remaining
                    .iter()
                    .filter(|m| m.ordinal < fc && !covered(m.ordinal))
                    .cloned()
                    .collect(),
                remaining
                    .iter()
                    .filter(|m| m.ordinal > fc && !covered(m.ordinal))
                    .cloned()
                    .collect(),
            ),
            None => (remaining.to_vec(), Vec::new()),
        };

        let block_size = self.config.mid_term_block_size;
        let mut mid_term_blocks_due: Vec<Vec<Message>> = Vec::new();

        // Pre-coverage region: full blocks aligned from the newest end; the
        // oldest partial remainder folds into the consolidated summary.
        let partial = pre.len() % block_size;
        consolidation_due.extend_from_slice(&pre[..partial]);
        for chunk in pre[partial..].chunks(block_size) {
            mid_term_blocks_due.push(chunk.to_vec());
        }

        // Post-coverage region: full blocks from the oldest end; the newest
        // partial remainder waits for more messages.
        let full = post.len() - post.len() % block_size;
        for chunk in post[..full].chunks(block_size) {
            mid_term_blocks_due.push(chunk.to_vec());
        }
        let awaiting_block = post[full..].to_vec();

        Ok(TierPlan {
            immediate: immediate.to_vec(),
            mid_term_blocks_due,
            consolidation_due,
            awaiting_block,
            mid_term_summaries,
            consolidated_summary,
            superseded_block_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::message::{ConversationId, MessageKind, Role};

    fn msgs(range: std::ops::RangeInclusive<u64>) -> Vec<Message> {
        range
            .map(|i| {
                if i % 2 == 1 {
                    Message::user(i, format!("user turn {i}"))
                } else {
                    Message::model(i, format!("model turn {i}")).with_kind(MessageKind::General)
                }
            })
            .collect()
    }

    fn block_record(ordinals: Vec<u64>) -> SummaryRecord {
        SummaryRecord::new(
            ConversationId::from("c1"),
            SummaryKind::Block,
            "block summary",
            ordinals,
        )
    }

    fn consolidated_record(ordinals: Vec<u64>) -> SummaryRecord {
        SummaryRecord::new(
            ConversationId::from("c1"),
            SummaryKind::Consolidated,
            "the story so far",
            ordinals,
        )
    }

    fn classifier() -> TierClassifier {
        TierClassifier::new(MemoryConfig::default())
    }

    #[test]
    fn thirty_messages_split_per_documented_scenario() {
        // immediate=20, block=6, threshold=25: messages 11-30 Immediate,
        // 5-10 one due block, 1-4 due for consolidation.
        let plan = classifier().classify(&msgs(1..=30), &[]).unwrap();

        let imm: Vec<u64> = plan.immediate.iter().map(|m| m.ordinal).collect();
        assert_eq!(imm, (11..=30).collect::<Vec<_>>());

        assert_eq!(plan.mid_term_blocks_due.len(), 1);
        let block: Vec<u64> = plan.mid_term_blocks_due[0].iter().map(|m| m.ordinal).collect();
        assert_eq!(block, vec![5, 6, 7, 8, 9, 10]);

        let cons: Vec<u64> = plan.consolidation_due.iter().map(|m| m.ordinal).collect();
        assert_eq!(cons, vec![1, 2, 3, 4]);
        assert!(plan.awaiting_block.is_empty());
    }

    #[test]
    fn short_conversation_is_all_immediate() {
        let plan = classifier().classify(&msgs(1..=12), &[]).unwrap();
        assert_eq!(plan.immediate.len(), 12);
        assert!(!plan.has_work());
        assert!(plan.consolidation_due.is_empty());
    }

    #[test]
    fn classification_is_idempotent() {
        let messages = msgs(1..=42);
        let summaries = vec![block_record((5..=10).collect())];
        let a = classifier().classify(&messages, &summaries).unwrap();
        let b = classifier().classify(&messages, &summaries).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn covered_blocks_are_mid_term_not_due() {
        // 30 messages, 5-10 already block-covered: only 1-4 remain due for
        // consolidation, nothing else owed.
        let summaries = vec![block_record((5..=10).collect())];
        let plan = classifier().classify(&msgs(1..=30), &summaries).unwrap();

        assert!(plan.mid_term_blocks_due.is_empty());
        assert_eq!(plan.mid_term_summaries.len(), 1);
        let cons: Vec<u64> = plan.consolidation_due.iter().map(|m| m.ordinal).collect();
        assert_eq!(cons, vec![1, 2, 3, 4]);
    }

    #[test]
    fn post_coverage_partial_waits_for_full_block() {
        // Consolidated through 4, block covers 5-10; 31 messages leave
        // message 11 uncovered behind the immediate window. One message
        // cannot fill a block and must not consolidate past mid-term
        // coverage, so it waits.
        let summaries = vec![
            consolidated_record((1..=4).collect()),
            block_record((5..=10).collect()),
        ];
        let plan = classifier().classify(&msgs(1..=31), &summaries).unwrap();

        assert!(plan.consolidation_due.is_empty());
        assert!(plan.mid_term_blocks_due.is_empty());
        let waiting: Vec<u64> = plan.awaiting_block.iter().map(|m| m.ordinal).collect();
        assert_eq!(waiting, vec![11]);
    }

    #[test]
    fn post_coverage_full_block_becomes_due() {
        let summaries = vec![
            consolidated_record((1..=4).collect()),
            block_record((5..=10).collect()),
        ];
        let plan = classifier().classify(&msgs(1..=36), &summaries).unwrap();

        assert_eq!(plan.mid_term_blocks_due.len(), 1);
        let due: Vec<u64> = plan.mid_term_blocks_due[0].iter().map(|m| m.ordinal).collect();
        assert_eq!(due, vec![11, 12, 13, 14, 15, 16]);
        assert!(plan.awaiting_block.is_empty());
    }

    #[test]
    fn threshold_overflow_consolidates_whole_blocks() {
        // 60 messages: old region 1-40, consolidated through 5, blocks
        // cover 6-11 and 12-17. 35 unconsolidated > threshold 25, so the
        // oldest excess (widened to whole blocks) is due for consolidation
        // and those block records are superseded.
        let b1 = block_record((6..=11).collect());
        let b2 = block_record((12..=17).collect());
        let summaries = vec![
            consolidated_record((1..=5).collect()),
            b1.clone(),
            b2.clone(),
        ];
        let plan = classifier().classify(&msgs(1..=60), &summaries).unwrap();

        let cons: Vec<u64> = plan.consolidation_due.iter().map(|m| m.ordinal).collect();
        assert!(cons.starts_with(&(6..=17).collect::<Vec<_>>()[..]));
        assert!(plan.superseded_block_ids.contains(&b1.id));
        assert!(plan.superseded_block_ids.contains(&b2.id));
        assert!(plan.mid_term_summaries.is_empty());
    }

    #[test]
    fn tier_assignment_is_contiguous() {
        let summaries = vec![
            consolidated_record((1..=4).collect()),
            block_record((5..=10).collect()),
        ];
        let plan = classifier().classify(&msgs(1..=45), &summaries).unwrap();

        let assignments = plan.assignments();
        let ranks: Vec<Tier> = assignments.iter().map(|(_, t)| *t).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted, "tiers must be contiguous by ordinal");
    }

    #[test]
    fn out_of_order_log_is_a_consistency_error() {
        let mut messages = msgs(1..=5);
        messages.swap(1, 3);
        let err = classifier().classify(&messages, &[]).unwrap_err();
        assert!(matches!(err, ConsistencyError::NonContiguousTiers { .. }));
    }

    #[test]
    fn summary_inside_immediate_window_is_a_consistency_error() {
        // Block covering 25-30 while 11-30 are immediate.
        let summaries = vec![block_record((25..=30).collect())];
        let err = classifier().classify(&msgs(1..=30), &summaries).unwrap_err();
        assert!(matches!(err, ConsistencyError::NonContiguousTiers { .. }));
    }
}
