//! Entity matching — the update-vs-create decision seam.
//!
//! Name matching against extracted text is inherently fuzzy; the extractor
//! takes a matcher implementation rather than hardwiring string equality,
//! so a fuzzier strategy can be swapped in without touching the parse or
//! the version semantics. The shipped baseline is exact case-folded
//! equality.

use storyloom_core::knowledge::{Entity, EntityKind};

/// Decides whether an extracted name refers to an existing entity.
pub trait EntityMatcher: Send + Sync {
    /// A short strategy name, for logs.
    fn name(&self) -> &str;

    /// Whether `candidate` names `entity`.
    fn matches(&self, candidate: &str, entity: &Entity) -> bool;

    /// Find the existing entity of `kind` that `candidate` refers to.
    fn find<'a>(
        &self,
        candidate: &str,
        kind: EntityKind,
        entities: &'a [Entity],
    ) -> Option<&'a Entity> {
        entities
            .iter()
            .find(|e| e.kind == kind && self.matches(candidate, e))
    }

    /// Find an existing entity of any kind by name (relationship endpoints
    /// do not carry a kind in the template).
    fn find_any<'a>(&self, candidate: &str, entities: &'a [Entity]) -> Option<&'a Entity> {
        entities.iter().find(|e| self.matches(candidate, e))
    }
}

/// Baseline matcher: trimmed, case-folded name equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

impl EntityMatcher for ExactMatcher {
    fn name(&self) -> &str {
        "exact"
    }

    fn matches(&self, candidate: &str, entity: &Entity) -> bool {
        candidate.trim().to_lowercase() == entity.name.trim().to_lowercase()
    }
}
