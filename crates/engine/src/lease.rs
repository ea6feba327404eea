//! Lease registry — expiring ownership tokens for conversations and stories.
//!
//! A lease guards a resource for the duration of one operation. Holders
//! release on drop; a holder that crashes without releasing simply ages out
//! after the TTL instead of wedging the resource forever. Time comes from
//! the injected [`Clock`] so expiry is testable.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use storyloom_core::clock::Clock;
use storyloom_core::error::ConcurrencyError;
use tracing::{debug, warn};

struct LeaseEntry {
    holder: String,
    expires_at: DateTime<Utc>,
}

/// Tracks which resources are currently leased.
#[derive(Clone)]
pub struct LeaseRegistry {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    inner: Arc<Mutex<HashMap<String, LeaseEntry>>>,
}

impl LeaseRegistry {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Take the lease on `resource` for `holder`.
    ///
    /// Fails fast with [`ConcurrencyError::LeaseHeld`] when another holder
    /// has a live lease; an expired lease is evicted and taken over.
    pub fn acquire(&self, resource: &str, holder: &str) -> Result<LeaseGuard, ConcurrencyError> {
        let now = self.clock.now();
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(entry) = inner.get(resource) {
            if entry.expires_at > now {
                return Err(ConcurrencyError::LeaseHeld {
                    resource: resource.to_string(),
                    holder: entry.holder.clone(),
                });
            }
            warn!(
                resource,
                stale_holder = %entry.holder,
                "Expired lease taken over"
            );
        }

        inner.insert(
            resource.to_string(),
            LeaseEntry {
                holder: holder.to_string(),
                expires_at: now + self.ttl,
            },
        );
        debug!(resource, holder, "Lease acquired");
        Ok(LeaseGuard {
            registry: self.clone(),
            resource: resource.to_string(),
            holder: holder.to_string(),
        })
    }

    /// Whether a live lease exists for the resource.
    pub fn is_held(&self, resource: &str) -> bool {
        let now = self.clock.now();
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .get(resource)
                    .is_some_and(|entry| entry.expires_at > now)
            })
            .unwrap_or(false)
    }

    fn release(&self, resource: &str, holder: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            // Only the current holder may release; a taken-over stale lease
            // must not be dropped by its old owner.
            if inner.get(resource).is_some_and(|e| e.holder == holder) {
                inner.remove(resource);
                debug!(resource, holder, "Lease released");
            }
        }
    }
}

/// Releases its lease on drop.
pub struct LeaseGuard {
    registry: LeaseRegistry,
    resource: String,
    holder: String,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.registry.release(&self.resource, &self.holder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::clock::ManualClock;

    fn registry(ttl_secs: i64) -> (LeaseRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (
            LeaseRegistry::new(clock.clone(), Duration::seconds(ttl_secs)),
            clock,
        )
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let (registry, _clock) = registry(60);
        let _guard = registry.acquire("conversation/c1", "worker-1").unwrap();

        let err = registry.acquire("conversation/c1", "worker-2").err().unwrap();
        assert!(matches!(
            err,
            ConcurrencyError::LeaseHeld { ref holder, .. } if holder == "worker-1"
        ));
        // A different resource is unaffected.
        assert!(registry.acquire("conversation/c2", "worker-2").is_ok());
    }

    #[test]
    fn drop_releases() {
        let (registry, _clock) = registry(60);
        {
            let _guard = registry.acquire("story/s1", "worker-1").unwrap();
            assert!(registry.is_held("story/s1"));
        }
        assert!(!registry.is_held("story/s1"));
        assert!(registry.acquire("story/s1", "worker-2").is_ok());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let (registry, clock) = registry(30);
        let guard = registry.acquire("conversation/c1", "crashed-worker").unwrap();
        // Simulate a crash: leak the guard so it never releases.
        std::mem::forget(guard);

        clock.advance(Duration::seconds(31));
        assert!(!registry.is_held("conversation/c1"));
        let _guard = registry.acquire("conversation/c1", "worker-2").unwrap();
        assert!(registry.is_held("conversation/c1"));
    }

    #[test]
    fn stale_holder_cannot_release_taken_over_lease() {
        let (registry, clock) = registry(30);
        let stale = registry.acquire("conversation/c1", "worker-1").unwrap();
        clock.advance(Duration::seconds(31));

        let _fresh = registry.acquire("conversation/c1", "worker-2").unwrap();
        drop(stale);
        assert!(registry.is_held("conversation/c1"));
    }
}
