//! Error types for the Storyloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Model failures carry an
//! explicit transient/permanent split so callers can classify before retrying.

use thiserror::Error;

/// The top-level error type for all Storyloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model invocation errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Invariant violations (never silently repaired) ---
    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    // --- Lock/lease contention ---
    #[error("Concurrency error: {0}")]
    Concurrency(#[from] ConcurrencyError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures from the model invocation boundary.
///
/// The transient variants are safe to retry; the permanent ones must
/// short-circuit immediately (see [`ModelError::is_retryable`]).
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by model backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Safety rejection: {0}")]
    SafetyRejected(String),

    #[error("Model not configured: {0}")]
    NotConfigured(String),

    #[error("Generation cancelled")]
    Cancelled,
}

impl ModelError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Timeouts, rate limits, and network faults are transient. Malformed
    /// requests, safety rejections, and missing configuration never heal on
    /// their own, and cancellation is a caller decision, not a fault.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::Timeout(_) | ModelError::RateLimited { .. } | ModelError::Network(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// A tier or knowledge invariant was violated.
///
/// These are surfaced, never repaired in place: silent repair could mask
/// data corruption.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("Tier assignment is not contiguous: {detail}")]
    NonContiguousTiers { detail: String },

    #[error("Relationship references nonexistent entity: {from} -> {to}")]
    DanglingRelationship { from: String, to: String },

    #[error("Summary {summary_id} references missing message ordinal {ordinal}")]
    SummaryWithoutSource { summary_id: String, ordinal: u64 },

    #[error("Update delta targets nonexistent record {id}")]
    DeltaTargetMissing { id: String },
}

/// A lock or lease is already held for the target resource.
///
/// Callers should treat this as "try again later" rather than retrying
/// internally.
#[derive(Debug, Error)]
pub enum ConcurrencyError {
    #[error("Lease already held for {resource} by {holder}")]
    LeaseHeld { resource: String, holder: String },

    #[error("A knowledge rebuild is already in flight for story {story}")]
    RebuildInFlight { story: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ModelError::Timeout("deadline".into()).is_retryable());
        assert!(
            ModelError::RateLimited {
                retry_after_secs: 30
            }
            .is_retryable()
        );
        assert!(ModelError::Network("conn reset".into()).is_retryable());
    }

    #[test]
    fn permanent_errors_short_circuit() {
        assert!(!ModelError::MalformedRequest("empty prompt".into()).is_retryable());
        assert!(!ModelError::SafetyRejected("blocked".into()).is_retryable());
        assert!(!ModelError::NotConfigured("no api key".into()).is_retryable());
        assert!(!ModelError::Cancelled.is_retryable());
    }

    #[test]
    fn concurrency_error_displays_holder() {
        let err = Error::Concurrency(ConcurrencyError::LeaseHeld {
            resource: "conversation/abc".into(),
            holder: "worker-1".into(),
        });
        assert!(err.to_string().contains("conversation/abc"));
        assert!(err.to_string().contains("worker-1"));
    }

    #[test]
    fn consistency_error_displays_detail() {
        let err = Error::Consistency(ConsistencyError::DanglingRelationship {
            from: "Alice".into(),
            to: "Bob".into(),
        });
        assert!(err.to_string().contains("Alice"));
        assert!(err.to_string().contains("Bob"));
    }
}
