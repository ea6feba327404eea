//! # Storyloom Store
//!
//! [`Store`](storyloom_core::store::Store) implementations: a SQLite
//! backend for production and an in-memory backend for tests and ephemeral
//! sessions. Both enforce the same contract: monotonic message ordinals,
//! upsert-by-id summaries, and atomic story-scoped knowledge deletion.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
