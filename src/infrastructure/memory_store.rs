//! Process-local counter store.
//!
//! Backs the limiter when no shared backend is configured, and serves as the
//! fallback when the shared backend fails. Counts are only consistent within
//! one process.

use crate::application::ports::{Clock, CounterStore, PurgeExpired, StoreError};
use crate::domain::window::{WindowCount, WindowCounter};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Thread-safe fixed-window counters backed by DashMap.
///
/// The entry API holds the shard's write lock across check-and-increment,
/// so concurrent requests for one key never lose an update while requests
/// for keys in other shards proceed in parallel.
pub struct MemoryCounterStore {
    windows: DashMap<String, WindowCounter>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for MemoryCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCounterStore")
            .field("windows", &self.windows.len())
            .finish_non_exhaustive()
    }
}

impl MemoryCounterStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Increment without going through the async port.
    pub fn increment_now(&self, key: &str, window: Duration) -> WindowCount {
        let now = self.clock.now();

        // Avoid allocating the key on the hot path once it exists
        if let Some(mut counter) = self.windows.get_mut(key) {
            return counter.increment(now, window);
        }

        self.windows
            .entry(key.to_string())
            .or_insert_with(|| WindowCounter::new(now, window))
            .increment(now, window)
    }

    /// Current count for `key`, or `None` if no window is active.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        self.windows
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.count())
    }

    /// Number of tracked windows, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Check if the store holds no windows.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop all windows.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        Ok(self.increment_now(key, window))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

impl PurgeExpired for MemoryCounterStore {
    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, counter| !counter.is_expired(now));
        before.saturating_sub(self.windows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use std::thread;

    fn store(clock: &MockClock) -> MemoryCounterStore {
        MemoryCounterStore::new(Arc::new(clock.clone()))
    }

    #[test]
    fn test_increments_within_window() {
        let clock = MockClock::at_epoch_secs(1_000);
        let store = store(&clock);
        let window = Duration::from_secs(60);

        assert_eq!(store.increment_now("a", window).count, 1);
        clock.advance(Duration::from_secs(30));
        let second = store.increment_now("a", window);

        assert_eq!(second.count, 2);
        assert_eq!(second.reset_at_epoch_secs(), 1_060);
        assert_eq!(store.count("a"), Some(2));
    }

    #[test]
    fn test_new_window_after_expiry() {
        let clock = MockClock::at_epoch_secs(1_000);
        let store = store(&clock);
        let window = Duration::from_secs(60);

        for _ in 0..5 {
            store.increment_now("a", window);
        }
        clock.advance(Duration::from_secs(61));

        assert_eq!(store.count("a"), None);
        let fresh = store.increment_now("a", window);
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.reset_at_epoch_secs(), 1_121);
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = MockClock::at_epoch_secs(0);
        let store = store(&clock);
        let window = Duration::from_secs(60);

        store.increment_now("edge:1.1.1.1", window);
        store.increment_now("edge:1.1.1.1", window);
        let other = store.increment_now("edge:2.2.2.2", window);

        assert_eq!(other.count, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_purge_expired() {
        let clock = MockClock::at_epoch_secs(0);
        let store = store(&clock);

        store.increment_now("short", Duration::from_secs(10));
        store.increment_now("long", Duration::from_secs(100));
        clock.advance(Duration::from_secs(20));

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.count("long"), Some(1));

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let clock = MockClock::at_epoch_secs(0);
        let store = Arc::new(store(&clock));
        let window = Duration::from_secs(60);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..250 {
                        store.increment_now("hot", window);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.count("hot"), Some(2_000));
    }

    #[tokio::test]
    async fn test_port_never_fails() {
        let clock = MockClock::at_epoch_secs(0);
        let store = store(&clock);

        let result = store.increment("k", Duration::from_secs(1)).await;
        assert_eq!(result.unwrap().count, 1);
        assert_eq!(store.backend(), "memory");
    }
}
