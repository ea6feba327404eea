//! Context assembler — builds the bounded prompt for the next turn.
//!
//! The assembled context always has the same shape: a system preamble
//! (persona, established knowledge, then summaries oldest-first), followed
//! by the immediate tier verbatim as role-tagged turns. Raw content of every
//! message outside the immediate tier is represented only through its
//! summary record, which is what keeps the context bounded as the log grows.

use crate::tiers::TierPlan;
use storyloom_core::generator::{PromptContext, PromptMessage};
use storyloom_core::knowledge::{Entity, EntityKind, Relationship};
use storyloom_core::message::Role;
use tracing::debug;

/// What went into an assembled context, for logging and bound checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledStats {
    pub immediate_messages: usize,
    pub block_summaries: usize,
    pub has_consolidated: bool,
    pub entities: usize,
    pub relationships: usize,
    pub system_chars: usize,
}

/// Builds [`PromptContext`] values from a tier plan plus the story's
/// knowledge graph.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    default_persona: String,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            default_persona: DEFAULT_PERSONA.to_string(),
        }
    }
}

impl ContextAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the persona used when the conversation has no custom prompt.
    pub fn with_default_persona(mut self, persona: impl Into<String>) -> Self {
        self.default_persona = persona.into();
        self
    }

    /// Assemble the prompt for the next turn.
    ///
    /// The plan's pending work (blocks due, consolidation due) does not
    /// change what is assembled: until the pipeline commits a record, the
    /// affected messages are still part of the immediate tier or covered by
    /// an existing record, and uncovered older messages awaiting their block
    /// are included verbatim ahead of the immediate tier so nothing the
    /// model has seen silently disappears mid-compaction.
    pub fn assemble(
        &self,
        plan: &TierPlan,
        custom_prompt: Option<&str>,
        entities: &[Entity],
        relationships: &[Relationship],
    ) -> (PromptContext, AssembledStats) {
        let mut system = String::new();
        system.push_str(custom_prompt.unwrap_or(&self.default_persona));

        if !entities.is_empty() || !relationships.is_empty() {
            system.push_str("\n\n## Established canon\n");
            system.push_str(&knowledge_section(entities, relationships));
        }

        if let Some(consolidated) = &plan.consolidated_summary {
            system.push_str("\n\n## Story so far\n");
            system.push_str(&consolidated.content);
        }

        if !plan.mid_term_summaries.is_empty() {
            system.push_str("\n\n## Recent chapters\n");
            for record in &plan.mid_term_summaries {
                system.push('\n');
                system.push_str(&record.content);
            }
        }

        // Everything not yet covered by a committed record goes in verbatim.
        // Due blocks and waiting messages interleave around the coverage
        // frontier, so restore chronology by source ordinal.
        let mut ordered: Vec<(u64, PromptMessage)> = plan
            .mid_term_blocks_due
            .iter()
            .flatten()
            .chain(&plan.consolidation_due)
            .chain(&plan.awaiting_block)
            .chain(&plan.immediate)
            .map(|m| {
                let pm = match m.role {
                    Role::User => PromptMessage::user(&m.content),
                    Role::Model => PromptMessage::model(&m.content),
                };
                (m.ordinal, pm)
            })
            .collect();
        ordered.sort_by_key(|(ordinal, _)| *ordinal);
        let messages: Vec<PromptMessage> = ordered.into_iter().map(|(_, pm)| pm).collect();

        let stats = AssembledStats {
            immediate_messages: plan.immediate.len(),
            block_summaries: plan.mid_term_summaries.len(),
            has_consolidated: plan.consolidated_summary.is_some(),
            entities: entities.len(),
            relationships: relationships.len(),
            system_chars: system.len(),
        };
        debug!(
            turns = messages.len(),
            blocks = stats.block_summaries,
            consolidated = stats.has_consolidated,
            "Context assembled"
        );

        (PromptContext { system, messages }, stats)
    }
}

const DEFAULT_PERSONA: &str = "You are a collaborative fiction writer. Continue the story \
                               consistently with everything established so far.";

/// Render the knowledge graph as a compact facts section, grouped by kind.
fn knowledge_section(entities: &[Entity], relationships: &[Relationship]) -> String {
    let mut out = String::new();
    for (kind, heading) in [
        (EntityKind::Character, "Characters:"),
        (EntityKind::Location, "Locations:"),
        (EntityKind::PlotThread, "Plot threads:"),
        (EntityKind::CanonFact, "Canon facts:"),
    ] {
        let mut group: Vec<&Entity> = entities.iter().filter(|e| e.kind == kind).collect();
        if group.is_empty() {
            continue;
        }
        group.sort_by(|a, b| a.name.cmp(&b.name));
        out.push_str(heading);
        out.push('\n');
        for entity in group {
            if entity.value.is_empty() {
                out.push_str(&format!("- {}\n", entity.name));
            } else {
                out.push_str(&format!("- {}: {}\n", entity.name, entity.value));
            }
        }
    }
    if !relationships.is_empty() {
        let mut sorted: Vec<&Relationship> = relationships.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        out.push_str("Relationships:\n");
        for rel in sorted {
            out.push_str(&format!(
                "- {} -> {} ({})\n",
                rel.from_entity, rel.to_entity, rel.kind
            ));
        }
    }
    out
}
