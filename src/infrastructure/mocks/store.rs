//! Counter stores standing in for a failing shared backend.

use crate::application::ports::{Clock, CounterStore, StoreError};
use crate::domain::window::WindowCount;
use crate::infrastructure::memory_store::MemoryCounterStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stand-in for a shared backend that is down.
///
/// Every increment fails with `StoreError::Unavailable`. Calls are counted so
/// tests can tell whether a circuit breaker kept traffic away.
#[derive(Debug, Default)]
pub struct UnreachableStore {
    calls: AtomicUsize,
}

impl UnreachableStore {
    /// Create a store with no recorded calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of increments attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for UnreachableStore {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<WindowCount, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn backend(&self) -> &'static str {
        "unreachable"
    }
}

/// In-memory store that can be taken down and brought back.
///
/// Stands in for a shared backend that is unreachable for a while, such as
/// one still starting when the application boots.
#[derive(Debug)]
pub struct SwitchableStore {
    inner: MemoryCounterStore,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl SwitchableStore {
    /// Create a store, initially reachable or not.
    pub fn new(clock: Arc<dyn Clock>, available: bool) -> Self {
        Self {
            inner: MemoryCounterStore::new(clock),
            available: AtomicBool::new(available),
            calls: AtomicUsize::new(0),
        }
    }

    /// Bring the store up or down.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of increments attempted so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current count for `key` in the backing store.
    pub fn count(&self, key: &str) -> Option<u64> {
        self.inner.count(key)
    }
}

#[async_trait]
impl CounterStore for SwitchableStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(self.inner.increment_now(key, window))
    }

    fn backend(&self) -> &'static str {
        "switchable"
    }
}
