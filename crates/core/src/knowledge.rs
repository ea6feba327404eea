//! Knowledge graph value objects — structured story facts.
//!
//! Entities and relationships are versioned and carry provenance (the
//! ordinals of the messages that produced or last modified them). They are
//! created/updated only by extractor runs and destroyed in bulk only by a
//! rebuild, so ids are *deterministic* — derived from name and kind — which
//! is what makes a destructive rebuild reproduce the same graph.

use crate::message::StoryId;
use serde::{Deserialize, Serialize};

/// The category of a story fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Location,
    PlotThread,
    CanonFact,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Character => "character",
            EntityKind::Location => "location",
            EntityKind::PlotThread => "plot_thread",
            EntityKind::CanonFact => "canon_fact",
        }
    }
}

/// Deterministic entity id: kind plus case-folded name.
pub fn entity_id(kind: EntityKind, name: &str) -> String {
    format!("{}:{}", kind.as_str(), name.trim().to_lowercase())
}

/// Deterministic relationship id.
pub fn relationship_id(from_entity: &str, kind: &str, to_entity: &str) -> String {
    format!("{}|{}|{}", from_entity, kind.trim().to_lowercase(), to_entity)
}

/// A named story fact with a canonical value and a version counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Deterministic id (see [`entity_id`])
    pub id: String,

    /// The owning story
    pub story_id: StoryId,

    /// Display name as first extracted
    pub name: String,

    /// Fact category
    pub kind: EntityKind,

    /// Current canonical value
    pub value: String,

    /// Starts at 1, incremented on every update
    pub version: u32,

    /// Ordinals of the messages that produced or modified this entity
    pub provenance: Vec<u64>,
}

/// A typed, versioned link between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Deterministic id (see [`relationship_id`])
    pub id: String,

    /// The owning story
    pub story_id: StoryId,

    /// Entity id of the source
    pub from_entity: String,

    /// Entity id of the target
    pub to_entity: String,

    /// Link type, e.g. "ally", "located_in"
    pub kind: String,

    /// Starts at 1, incremented on every re-assertion
    pub version: u32,

    /// Ordinals of the messages that produced or modified this link
    pub provenance: Vec<u64>,
}

/// One extractor decision about an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityDelta {
    /// No match found — create at version 1
    Create {
        name: String,
        kind: EntityKind,
        value: String,
        ordinal: u64,
    },
    /// Matched an existing entity — bump version, append provenance
    Update {
        entity_id: String,
        value: String,
        ordinal: u64,
    },
}

/// One extractor decision about a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelationshipDelta {
    Create {
        from_entity: String,
        to_entity: String,
        kind: String,
        ordinal: u64,
    },
    Update {
        relationship_id: String,
        ordinal: u64,
    },
}
