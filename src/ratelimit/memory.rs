//! In-process window store.
//!
//! Counts live in a `DashMap`; holding the entry guard for the whole
//! read-check-increment keeps each hit atomic per key. Useful for a single
//! instance deployment and for exercising the limiter without Redis.
//!
//! Expired windows are swept every [`DEFAULT_PURGE_INTERVAL`] hits, so the map
//! stays bounded by the identities active within one window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::clock::{Clock, SystemClock};
use super::key::LimitKey;
use super::store::WindowStore;
use crate::error::{GatekeeperError, Result};

/// Hits between two sweeps of expired windows.
pub const DEFAULT_PURGE_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u64,
    expires_at: Instant,
}

/// Window store kept in process memory.
#[derive(Debug)]
pub struct MemoryWindowStore {
    windows: DashMap<String, WindowState>,
    clock: Arc<dyn Clock>,
    purge_interval: u64,
    hits: AtomicU64,
}

impl MemoryWindowStore {
    /// Create a store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
            purge_interval: DEFAULT_PURGE_INTERVAL,
            hits: AtomicU64::new(0),
        }
    }

    /// Sweep expired windows every `interval` hits (at least every hit).
    pub fn with_purge_interval(mut self, interval: u64) -> Self {
        self.purge_interval = interval.max(1);
        self
    }

    /// Drop windows whose expiry has passed.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.windows.retain(|_, state| state.expires_at > now);
    }

    /// Number of windows currently held, expired or not.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn hit(&self, key: &LimitKey, limit: u64, window: Duration) -> Result<u64> {
        let now = self.clock.now();
        let expires_at = now.checked_add(window).ok_or_else(|| {
            GatekeeperError::Config(format!("rate limit window {:?} is out of range", window))
        })?;
        let fresh = WindowState {
            count: 1,
            expires_at,
        };

        let wait = match self.windows.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                if state.expires_at <= now {
                    *state = fresh;
                    0
                } else if state.count + 1 > limit {
                    let remaining = state.expires_at.duration_since(now).as_millis() as u64;
                    remaining.max(1)
                } else {
                    state.count += 1;
                    0
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
                0
            }
        };

        trace!(key = %key, limit = limit, wait_ms = wait, "Counted hit in memory store");

        // The entry guard is released above; sweeping takes every shard lock.
        if (self.hits.fetch_add(1, Ordering::Relaxed) + 1) % self.purge_interval == 0 {
            self.purge_expired();
        }
        Ok(wait)
    }

    async fn count(&self, key: &LimitKey) -> Result<Option<u64>> {
        let now = self.clock.now();
        Ok(self
            .windows
            .get(key.as_str())
            .filter(|state| state.expires_at > now)
            .map(|state| state.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn store_with_clock() -> (MemoryWindowStore, ManualClock) {
        let clock = ManualClock::default();
        (MemoryWindowStore::with_clock(Arc::new(clock.clone())), clock)
    }

    fn key(name: &str) -> LimitKey {
        LimitKey::new("test", "limiter", name, 0)
    }

    #[tokio::test]
    async fn test_first_hit_opens_window() {
        let (store, _clock) = store_with_clock();
        let key = key("first");

        assert_eq!(store.count(&key).await.unwrap(), None);
        assert_eq!(store.hit(&key, 3, Duration::from_secs(1)).await.unwrap(), 0);
        assert_eq!(store.count(&key).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_rejected_hit_reports_remaining_window() {
        let (store, clock) = store_with_clock();
        let key = key("reject");
        let window = Duration::from_millis(5000);

        store.hit(&key, 2, window).await.unwrap();
        store.hit(&key, 2, window).await.unwrap();
        clock.advance(Duration::from_millis(1200));

        let wait = store.hit(&key, 2, window).await.unwrap();
        assert_eq!(wait, 3800);
        assert_eq!(store.count(&key).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_expired_window_resets_to_one() {
        let (store, clock) = store_with_clock();
        let key = key("expire");
        let window = Duration::from_millis(100);

        store.hit(&key, 1, window).await.unwrap();
        assert!(store.hit(&key, 1, window).await.unwrap() > 0);

        clock.advance(Duration::from_millis(100));
        assert_eq!(store.count(&key).await.unwrap(), None);
        assert_eq!(store.hit(&key, 1, window).await.unwrap(), 0);
        assert_eq!(store.count(&key).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_hits_sweep_expired_windows() {
        let clock = ManualClock::default();
        let store =
            MemoryWindowStore::with_clock(Arc::new(clock.clone())).with_purge_interval(4);
        let window = Duration::from_millis(10);

        for name in ["a", "b", "c"] {
            store.hit(&key(name), 5, window).await.unwrap();
        }
        assert_eq!(store.len(), 3);

        clock.advance(Duration::from_millis(20));
        store.hit(&key("d"), 5, window).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.count(&key("d")).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_out_of_range_window_is_config_error() {
        let (store, _clock) = store_with_clock();
        let result = store.hit(&key("huge"), 1, Duration::MAX).await;
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store_with_clock();

        store.hit(&key("short"), 5, Duration::from_millis(10)).await.unwrap();
        store.hit(&key("long"), 5, Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.len(), 2);

        clock.advance(Duration::from_millis(50));
        store.purge_expired();
        assert_eq!(store.len(), 1);
        assert_eq!(store.count(&key("long")).await.unwrap(), Some(1));
    }
}
