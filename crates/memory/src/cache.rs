//! TTL cache — short-lived memoization of cheap-but-frequent lookups.
//!
//! Used for conversation-existence checks so every turn does not re-query
//! the store. Entries expire on read; [`TtlCache::cleanup`] exists for
//! callers that want to bound memory on long-idle processes.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use storyloom_core::clock::Clock;
use tracing::trace;

/// A string-keyed cache whose entries expire `ttl` after insertion.
///
/// Time comes from the injected [`Clock`], so tests drive expiry without
/// sleeping.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, (DateTime<Utc>, V)>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Fetch a live entry; an expired one is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((inserted, value)) if now - *inserted < self.ttl => Some(value.clone()),
            Some(_) => {
                trace!(key, "Cache entry expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or refresh an entry, restarting its TTL.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let now = self.clock.now();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.into(), (now, value));
        }
    }

    /// Drop one entry immediately (e.g. after a deletion makes it stale).
    pub fn invalidate(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        match self.entries.lock() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, (inserted, _)| now - *inserted < self.ttl);
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::clock::ManualClock;

    fn cache_with_clock(ttl_secs: i64) -> (TtlCache<bool>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = TtlCache::new(Duration::seconds(ttl_secs), clock.clone());
        (cache, clock)
    }

    #[test]
    fn hit_within_ttl() {
        let (cache, clock) = cache_with_clock(60);
        cache.put("conv-1", true);
        clock.advance(Duration::seconds(59));
        assert_eq!(cache.get("conv-1"), Some(true));
    }

    #[test]
    fn entry_expires_after_ttl() {
        let (cache, clock) = cache_with_clock(60);
        cache.put("conv-1", true);
        clock.advance(Duration::seconds(61));
        assert_eq!(cache.get("conv-1"), None);
        // The expired entry was evicted, not just hidden.
        assert!(cache.is_empty());
    }

    #[test]
    fn put_refreshes_ttl() {
        let (cache, clock) = cache_with_clock(60);
        cache.put("conv-1", true);
        clock.advance(Duration::seconds(45));
        cache.put("conv-1", true);
        clock.advance(Duration::seconds(45));
        assert_eq!(cache.get("conv-1"), Some(true));
    }

    #[test]
    fn invalidate_removes_immediately() {
        let (cache, _clock) = cache_with_clock(60);
        cache.put("conv-1", true);
        cache.invalidate("conv-1");
        assert_eq!(cache.get("conv-1"), None);
    }

    #[test]
    fn cleanup_sweeps_only_expired() {
        let (cache, clock) = cache_with_clock(60);
        cache.put("old", true);
        clock.advance(Duration::seconds(40));
        cache.put("new", true);
        clock.advance(Duration::seconds(30));

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new"), Some(true));
    }
}
