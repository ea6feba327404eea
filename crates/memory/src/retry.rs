//! Retry executor — generic retry-with-backoff for flaky model calls.
//!
//! Callers classify errors before retrying: anything where
//! [`ModelError::is_retryable`] returns false short-circuits immediately
//! rather than exhausting attempts. Cancellation is checked before each
//! attempt, never mid-call, and a per-attempt deadline turns a hung call
//! into a retryable timeout.

use std::future::Future;
use std::time::Duration;
use storyloom_core::clock::CancelToken;
use storyloom_core::error::ModelError;
use storyloom_config::RetryConfig;
use tracing::{debug, warn};

/// Backoff policy: up to `max_attempts` tries, waiting
/// `initial_delay * backoff_multiplier^(attempt-1)` between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

/// A successful execution and how many attempts it took.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// All attempts exhausted (or a permanent error short-circuited).
#[derive(Debug, Clone)]
pub struct RetryError {
    pub error: ModelError,
    pub attempts: u32,
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempts)", self.error, self.attempts)
    }
}

impl std::error::Error for RetryError {}

impl From<RetryError> for ModelError {
    fn from(err: RetryError) -> Self {
        err.error
    }
}

/// The retry executor. Stateless — create one and reuse it.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    deadline: Option<Duration>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            deadline: None,
        }
    }

    /// Apply a per-attempt deadline; elapsing counts as a retryable timeout.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run `operation` until it succeeds, a permanent error occurs, the
    /// caller cancels, or attempts are exhausted.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancelToken,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut delay = self.policy.initial_delay;
        let mut last_error: Option<ModelError> = None;

        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(RetryError {
                    error: ModelError::Cancelled,
                    attempts: attempt - 1,
                });
            }

            if attempt > 1 {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(self.policy.backoff_multiplier);
            }

            match self.attempt(&mut operation).await {
                Ok(value) => return Ok(RetryOutcome { value, attempts: attempt }),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "Attempt failed, will retry");
                    last_error = Some(e);
                }
                Err(e) => {
                    return Err(RetryError { error: e, attempts: attempt });
                }
            }
        }

        Err(RetryError {
            error: last_error
                .unwrap_or_else(|| ModelError::NotConfigured("retry ran zero attempts".into())),
            attempts: self.policy.max_attempts,
        })
    }

    async fn attempt<T, F, Fut>(&self, operation: &mut F) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout(format!(
                    "attempt exceeded {}ms deadline",
                    deadline.as_millis()
                ))),
            },
            None => operation().await,
        }
    }
}
