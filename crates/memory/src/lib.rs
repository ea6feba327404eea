//! # Storyloom Memory
//!
//! The hierarchical memory pipeline: tier classification, model-backed
//! summarization, bounded context assembly, retry execution, and the TTL
//! existence cache.
//!
//! Data flow per turn: new message → [`TierClassifier`] re-evaluates tier
//! boundaries → [`SummarizationPipeline`] compacts whatever the plan marks
//! due → [`ContextAssembler`] produces the next prompt. The classifier is
//! pure; all I/O lives in the pipeline.

pub mod assembler;
pub mod cache;
pub mod pipeline;
pub mod retry;
pub mod tiers;

pub use assembler::{AssembledStats, ContextAssembler};
pub use cache::TtlCache;
pub use pipeline::{PipelineStats, SummarizationPipeline};
pub use retry::{RetryError, RetryExecutor, RetryOutcome, RetryPolicy};
pub use tiers::{Tier, TierClassifier, TierPlan};
