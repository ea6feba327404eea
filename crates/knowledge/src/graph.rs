//! In-memory graph state and delta application.
//!
//! [`GraphState`] holds the entities and relationships of one story and
//! applies extraction deltas with the version semantics both incremental
//! extraction and rebuild share: create at version 1, update bumps the
//! version and appends provenance. It is pure; persisting the changed
//! records is the caller's job.

use crate::extractor::Extraction;
use std::collections::HashMap;
use storyloom_core::error::ConsistencyError;
use storyloom_core::knowledge::{
    Entity, EntityDelta, Relationship, RelationshipDelta, entity_id,
};
use storyloom_core::message::StoryId;

/// Records changed by one application, ready to persist, plus counts.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    pub changed_entities: Vec<Entity>,
    pub changed_relationships: Vec<Relationship>,
    pub entities_created: u64,
    pub relationships_created: u64,
}

/// One story's knowledge graph, keyed by deterministic id.
#[derive(Debug, Clone)]
pub struct GraphState {
    story_id: StoryId,
    entities: HashMap<String, Entity>,
    relationships: HashMap<String, Relationship>,
}

impl GraphState {
    pub fn empty(story_id: StoryId) -> Self {
        Self {
            story_id,
            entities: HashMap::new(),
            relationships: HashMap::new(),
        }
    }

    /// Build from persisted rows.
    pub fn from_parts(
        story_id: StoryId,
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
    ) -> Self {
        Self {
            story_id,
            entities: entities.into_iter().map(|e| (e.id.clone(), e)).collect(),
            relationships: relationships
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect(),
        }
    }

    /// Current entities, unordered. The extractor matches against this.
    pub fn entities(&self) -> Vec<Entity> {
        self.entities.values().cloned().collect()
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.relationships.values().cloned().collect()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn relationship(&self, id: &str) -> Option<&Relationship> {
        self.relationships.get(id)
    }

    /// Apply one extraction's deltas in order.
    ///
    /// Entity deltas are applied before relationship deltas so a link can
    /// reference an entity introduced by the same message. A relationship
    /// delta whose endpoint is still missing is an inconsistency, surfaced
    /// rather than repaired.
    pub fn apply(&mut self, extraction: &Extraction) -> Result<ApplyOutcome, ConsistencyError> {
        let mut outcome = ApplyOutcome::default();

        for delta in &extraction.entities {
            match delta {
                EntityDelta::Create {
                    name,
                    kind,
                    value,
                    ordinal,
                } => {
                    let id = entity_id(*kind, name);
                    match self.entities.get_mut(&id) {
                        // Re-created name: treat as an update so replay
                        // stays convergent whatever the log contains.
                        Some(existing) => {
                            existing.version += 1;
                            if !value.is_empty() {
                                existing.value = value.clone();
                            }
                            existing.provenance.push(*ordinal);
                            outcome.changed_entities.push(existing.clone());
                        }
                        None => {
                            let entity = Entity {
                                id: id.clone(),
                                story_id: self.story_id.clone(),
                                name: name.clone(),
                                kind: *kind,
                                value: value.clone(),
                                version: 1,
                                provenance: vec![*ordinal],
                            };
                            self.entities.insert(id, entity.clone());
                            outcome.entities_created += 1;
                            outcome.changed_entities.push(entity);
                        }
                    }
                }
                EntityDelta::Update {
                    entity_id,
                    value,
                    ordinal,
                } => {
                    let entity = self.entities.get_mut(entity_id).ok_or_else(|| {
                        ConsistencyError::DeltaTargetMissing {
                            id: entity_id.clone(),
                        }
                    })?;
                    entity.version += 1;
                    entity.value = value.clone();
                    entity.provenance.push(*ordinal);
                    outcome.changed_entities.push(entity.clone());
                }
            }
        }

        for delta in &extraction.relationships {
            match delta {
                RelationshipDelta::Create {
                    from_entity,
                    to_entity,
                    kind,
                    ordinal,
                } => {
                    for endpoint in [from_entity, to_entity] {
                        if !self.entities.contains_key(endpoint) {
                            return Err(ConsistencyError::DanglingRelationship {
                                from: from_entity.clone(),
                                to: to_entity.clone(),
                            });
                        }
                    }
                    let id = storyloom_core::knowledge::relationship_id(
                        from_entity,
                        kind,
                        to_entity,
                    );
                    match self.relationships.get_mut(&id) {
                        Some(existing) => {
                            existing.version += 1;
                            existing.provenance.push(*ordinal);
                            outcome.changed_relationships.push(existing.clone());
                        }
                        None => {
                            let relationship = Relationship {
                                id: id.clone(),
                                story_id: self.story_id.clone(),
                                from_entity: from_entity.clone(),
                                to_entity: to_entity.clone(),
                                kind: kind.clone(),
                                version: 1,
                                provenance: vec![*ordinal],
                            };
                            self.relationships.insert(id, relationship.clone());
                            outcome.relationships_created += 1;
                            outcome.changed_relationships.push(relationship);
                        }
                    }
                }
                RelationshipDelta::Update {
                    relationship_id,
                    ordinal,
                } => {
                    let relationship =
                        self.relationships.get_mut(relationship_id).ok_or_else(|| {
                            ConsistencyError::DeltaTargetMissing {
                                id: relationship_id.clone(),
                            }
                        })?;
                    relationship.version += 1;
                    relationship.provenance.push(*ordinal);
                    outcome.changed_relationships.push(relationship.clone());
                }
            }
        }

        Ok(outcome)
    }
}
