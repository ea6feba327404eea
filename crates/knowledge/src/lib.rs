//! # Storyloom Knowledge
//!
//! The structured side of story memory: parsing section messages into typed
//! entity/relationship deltas, applying those deltas with create/update
//! version semantics, and the destructive per-story rebuild that re-derives
//! the whole graph from the raw message log.
//!
//! Extraction is pure and deterministic; that property is what lets a
//! rebuild replay the log and land on the same graph every time.

pub mod extractor;
pub mod graph;
pub mod matcher;
pub mod rebuild;

pub use extractor::{Extraction, KnowledgeExtractor};
pub use graph::{ApplyOutcome, GraphState};
pub use matcher::{EntityMatcher, ExactMatcher};
pub use rebuild::{RebuildEngine, RebuildPhase, RebuildStats};
