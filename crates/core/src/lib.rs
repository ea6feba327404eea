//! # Storyloom Core
//!
//! Domain value objects and the trait seams every other crate builds on:
//! messages and conversations, summary records, knowledge entities and
//! relationships, the [`generator::Generator`] and [`store::Store`]
//! interfaces, the error taxonomy, and injectable time/cancellation.
//!
//! This crate holds no I/O and no policy; thresholds live in
//! `storyloom-config` and behavior in the memory, knowledge, and engine
//! crates.

pub mod clock;
pub mod error;
pub mod generator;
pub mod knowledge;
pub mod message;
pub mod store;
pub mod summary;

pub use error::{ConcurrencyError, ConsistencyError, Error, ModelError, Result, StoreError};
pub use message::{ConversationId, Message, MessageKind, Role, StoryId};
