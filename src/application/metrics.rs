//! Observability metrics for rate limiting.
//!
//! Counts decisions and backend degradation so operators can see how hard
//! limits are biting and whether the shared store is healthy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking rate limiting statistics.
///
/// Cloning shares the underlying counters, so one instance can be handed to
/// every limiter and store built by a registry.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Requests that passed their policy
    requests_allowed: AtomicU64,
    /// Requests rejected with 429
    requests_denied: AtomicU64,
    /// Increments served by the in-memory fallback after a backend failure
    backend_fallbacks: AtomicU64,
    /// Checks that failed open because no store could answer
    fail_open: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                requests_allowed: AtomicU64::new(0),
                requests_denied: AtomicU64::new(0),
                backend_fallbacks: AtomicU64::new(0),
                fail_open: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn record_allowed(&self) {
        self.inner.requests_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self) {
        self.inner.requests_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.inner.backend_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail_open(&self) {
        self.inner.fail_open.fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of requests allowed.
    pub fn requests_allowed(&self) -> u64 {
        self.inner.requests_allowed.load(Ordering::Relaxed)
    }

    /// Total number of requests denied.
    pub fn requests_denied(&self) -> u64 {
        self.inner.requests_denied.load(Ordering::Relaxed)
    }

    /// Total number of increments that fell back to in-memory counting.
    pub fn backend_fallbacks(&self) -> u64 {
        self.inner.backend_fallbacks.load(Ordering::Relaxed)
    }

    /// Total number of checks that failed open.
    pub fn fail_open(&self) -> u64 {
        self.inner.fail_open.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_allowed: self.requests_allowed(),
            requests_denied: self.requests_denied(),
            backend_fallbacks: self.backend_fallbacks(),
            fail_open: self.fail_open(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.inner.requests_allowed.store(0, Ordering::Relaxed);
        self.inner.requests_denied.store(0, Ordering::Relaxed);
        self.inner.backend_fallbacks.store(0, Ordering::Relaxed);
        self.inner.fail_open.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests that passed their policy
    pub requests_allowed: u64,
    /// Requests rejected with 429
    pub requests_denied: u64,
    /// Increments served by the in-memory fallback
    pub backend_fallbacks: u64,
    /// Checks that failed open
    pub fail_open: u64,
}

impl MetricsSnapshot {
    /// Ratio of denied requests to all checked requests (0.0 to 1.0).
    pub fn denial_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.requests_denied as f64 / total as f64
        }
    }

    /// Total number of checked requests (allowed + denied).
    pub fn total_requests(&self) -> u64 {
        self.requests_allowed.saturating_add(self.requests_denied)
    }
}
