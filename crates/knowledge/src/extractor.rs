//! Knowledge extractor — parses section messages into typed deltas.
//!
//! Only section proposals and section content carry knowledge; every other
//! message kind yields an empty extraction. Parsing is total: malformed
//! lines are skipped, never fatal. It is also deterministic for a given
//! message and graph state, which the rebuild engine depends on when it
//! replays the log.
//!
//! Template grammar (unknown sections are ignored):
//!
//! ```text
//! Title: <section title>
//! Characters: <name>, <name>, ...
//! Locations: <name>, ...
//! Threads: <name>, ...
//! Canon:
//! <name> | <character|location|plot_thread|canon_fact> | <value>
//! Relationships:
//! <from> -> <to> : <kind>
//! ```

use crate::matcher::{EntityMatcher, ExactMatcher};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use storyloom_core::knowledge::{
    Entity, EntityDelta, EntityKind, Relationship, RelationshipDelta, entity_id, relationship_id,
};
use storyloom_core::message::Message;
use tracing::trace;

/// The typed outcome of extracting one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub entities: Vec<EntityDelta>,
    pub relationships: Vec<RelationshipDelta>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// Parses structured section messages against the current graph state.
pub struct KnowledgeExtractor {
    matcher: Arc<dyn EntityMatcher>,
}

impl Default for KnowledgeExtractor {
    fn default() -> Self {
        Self {
            matcher: Arc::new(ExactMatcher),
        }
    }
}

impl KnowledgeExtractor {
    pub fn new(matcher: Arc<dyn EntityMatcher>) -> Self {
        Self { matcher }
    }

    /// Extract deltas from one message given the entities and relationships
    /// that exist at this point of the log.
    pub fn extract(
        &self,
        message: &Message,
        known_entities: &[Entity],
        known_relationships: &[Relationship],
    ) -> Extraction {
        if !message.kind.carries_knowledge() {
            return Extraction::default();
        }

        let mut state = MessageScan {
            extraction: Extraction::default(),
            touched: HashSet::new(),
            created_names: HashMap::new(),
            ordinal: message.ordinal,
        };

        let mut block = Block::None;
        for raw in message.content.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = header(line, "Title:") {
                block = Block::None;
                self.mention(&mut state, rest, EntityKind::PlotThread, known_entities);
            } else if let Some(rest) = header(line, "Characters:") {
                block = Block::None;
                for name in list(rest) {
                    self.mention(&mut state, name, EntityKind::Character, known_entities);
                }
            } else if let Some(rest) = header(line, "Locations:") {
                block = Block::None;
                for name in list(rest) {
                    self.mention(&mut state, name, EntityKind::Location, known_entities);
                }
            } else if let Some(rest) = header(line, "Threads:") {
                block = Block::None;
                for name in list(rest) {
                    self.mention(&mut state, name, EntityKind::PlotThread, known_entities);
                }
            } else if header(line, "Canon:").is_some() {
                block = Block::Canon;
            } else if header(line, "Relationships:").is_some() {
                block = Block::Relationships;
            } else {
                match block {
                    Block::Canon => self.canon_row(&mut state, line, known_entities),
                    Block::Relationships => self.relationship_row(
                        &mut state,
                        line,
                        known_entities,
                        known_relationships,
                    ),
                    Block::None => trace!(line, "Ignoring unknown section line"),
                }
            }
        }

        state.extraction
    }

    /// A bare name mention: appends provenance to an existing entity or
    /// creates a new one with no canonical value yet. Repeat mentions within
    /// one message are collapsed.
    fn mention(&self, state: &mut MessageScan, name: &str, kind: EntityKind, known: &[Entity]) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let id = entity_id(kind, name);
        if !state.touched.insert(id.clone()) {
            return;
        }

        match self.matcher.find(name, kind, known) {
            Some(existing) => state.extraction.entities.push(EntityDelta::Update {
                entity_id: existing.id.clone(),
                value: existing.value.clone(),
                ordinal: state.ordinal,
            }),
            None => {
                state.created_names.insert(name.to_lowercase(), id);
                state.extraction.entities.push(EntityDelta::Create {
                    name: name.to_string(),
                    kind,
                    value: String::new(),
                    ordinal: state.ordinal,
                });
            }
        }
    }

    /// A `name | type | value` canon row sets or replaces the canonical
    /// value. Rows with an unrecognized type are skipped.
    fn canon_row(&self, state: &mut MessageScan, line: &str, known: &[Entity]) {
        let mut parts = line.splitn(3, '|').map(str::trim);
        let (name, kind_str, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(k), Some(v)) if !n.is_empty() => (n, k, v),
            _ => {
                trace!(line, "Skipping malformed canon row");
                return;
            }
        };
        let Some(kind) = kind_from_str(kind_str) else {
            trace!(kind = kind_str, "Skipping canon row with unknown type");
            return;
        };

        let id = entity_id(kind, name);
        let exists = self.matcher.find(name, kind, known).is_some();
        if exists || state.touched.contains(&id) {
            state.extraction.entities.push(EntityDelta::Update {
                entity_id: id.clone(),
                value: value.to_string(),
                ordinal: state.ordinal,
            });
        } else {
            state.created_names.insert(name.to_lowercase(), id.clone());
            state.extraction.entities.push(EntityDelta::Create {
                name: name.to_string(),
                kind,
                value: value.to_string(),
                ordinal: state.ordinal,
            });
        }
        state.touched.insert(id);
    }

    /// A `from -> to : kind` row. Endpoints resolve against the known graph
    /// first, then against names introduced earlier in this message; a name
    /// found in neither is created implicitly as a character.
    fn relationship_row(
        &self,
        state: &mut MessageScan,
        line: &str,
        known_entities: &[Entity],
        known_relationships: &[Relationship],
    ) {
        let Some((endpoints, kind)) = line.rsplit_once(':') else {
            trace!(line, "Skipping malformed relationship row");
            return;
        };
        let Some((from, to)) = endpoints.split_once("->") else {
            trace!(line, "Skipping malformed relationship row");
            return;
        };
        let (from, to, kind) = (from.trim(), to.trim(), kind.trim());
        if from.is_empty() || to.is_empty() || kind.is_empty() {
            trace!(line, "Skipping incomplete relationship row");
            return;
        }

        let from_id = self.resolve_endpoint(state, from, known_entities);
        let to_id = self.resolve_endpoint(state, to, known_entities);
        let rel_id = relationship_id(&from_id, kind, &to_id);
        if !state.touched.insert(rel_id.clone()) {
            return;
        }

        if known_relationships.iter().any(|r| r.id == rel_id) {
            state.extraction.relationships.push(RelationshipDelta::Update {
                relationship_id: rel_id,
                ordinal: state.ordinal,
            });
        } else {
            state.extraction.relationships.push(RelationshipDelta::Create {
                from_entity: from_id,
                to_entity: to_id,
                kind: kind.to_string(),
                ordinal: state.ordinal,
            });
        }
    }

    fn resolve_endpoint(&self, state: &mut MessageScan, name: &str, known: &[Entity]) -> String {
        if let Some(existing) = self.matcher.find_any(name, known) {
            return existing.id.clone();
        }
        if let Some(id) = state.created_names.get(&name.to_lowercase()) {
            return id.clone();
        }
        // Unknown endpoint: introduce it so the link has something to hang
        // on. Character is the overwhelmingly common case in section text.
        let id = entity_id(EntityKind::Character, name);
        state.created_names.insert(name.to_lowercase(), id.clone());
        state.touched.insert(id.clone());
        state.extraction.entities.push(EntityDelta::Create {
            name: name.to_string(),
            kind: EntityKind::Character,
            value: String::new(),
            ordinal: state.ordinal,
        });
        id
    }
}

enum Block {
    None,
    Canon,
    Relationships,
}

struct MessageScan {
    extraction: Extraction,
    /// Entity and relationship ids already given a delta in this message
    touched: HashSet<String>,
    /// Lowercased names introduced by this message, mapped to their ids
    created_names: HashMap<String, String>,
    ordinal: u64,
}

fn header<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let prefix = line.get(..name.len())?;
    if prefix.eq_ignore_ascii_case(name) {
        Some(line[name.len()..].trim())
    } else {
        None
    }
}

fn list(rest: &str) -> impl Iterator<Item = &str> {
    rest.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn kind_from_str(s: &str) -> Option<EntityKind> {
    match s.to_lowercase().as_str() {
        "character" => Some(EntityKind::Character),
        "location" => Some(EntityKind::Location),
        "plot_thread" => Some(EntityKind::PlotThread),
        "canon_fact" => Some(EntityKind::CanonFact),
        _ => None,
    }
}
