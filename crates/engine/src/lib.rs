//! # Storyloom Engine
//!
//! Orchestrates a chat turn end to end: lease the conversation, append the
//! user message, settle due compaction, assemble the bounded context, and
//! record the model's reply with incremental knowledge extraction. Also the
//! entry point for exchange deletion and destructive knowledge rebuilds.

pub mod lease;
pub mod turn;

pub use lease::{LeaseGuard, LeaseRegistry};
pub use turn::{PreparedTurn, TierStatus, TurnEngine};
