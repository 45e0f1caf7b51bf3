//! Rate limiter coordination logic.
//!
//! The rate limiter derives a key for a request, increments its window in
//! the counter store, and turns the resulting count into a [`Decision`].

use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, CounterStore};
use crate::domain::key::derive_key;
use crate::domain::policy::{Decision, Policy};
use http::HeaderMap;
use std::fmt;
use std::sync::Arc;

/// Applies one policy against a shared counter store.
///
/// Cheap to clone; clones share the store, clock and metrics.
#[derive(Clone)]
pub struct RateLimiter {
    policy: Arc<Policy>,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("backend", &self.store.backend())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    /// * `policy` - Limit and window applied to every key
    /// * `store` - Counter store, possibly shared with other limiters
    /// * `clock` - Time source for fail-open decisions and retry hints
    /// * `metrics` - Metrics tracker
    pub fn new(
        policy: Policy,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            policy: Arc::new(policy),
            store,
            clock,
            metrics,
        }
    }

    /// Check a request, keyed by client IP or by `identity_override` when
    /// the caller limits per principal.
    pub async fn check(&self, headers: &HeaderMap, identity_override: Option<&str>) -> Decision {
        let key = derive_key(headers, self.policy.key_prefix(), identity_override);
        self.check_key(&key).await
    }

    /// Check an already-derived key.
    ///
    /// # Fail-Safe Behavior
    /// If the store reports an error the request is allowed with a full
    /// quota. A computed denial is always honored.
    pub async fn check_key(&self, key: &str) -> Decision {
        let decision = match self.store.increment(key, self.policy.window()).await {
            Ok(window) => self.policy.decide(window.count, window.reset_at),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %key,
                    backend = self.store.backend(),
                    "Rate limit check failed, allowing request"
                );
                self.metrics.record_fail_open();
                self.fail_open_decision()
            }
        };

        if decision.allowed {
            self.metrics.record_allowed();
        } else {
            tracing::debug!(
                key = %key,
                limit = decision.limit,
                reset_at = decision.reset_at_epoch_secs,
                "Rate limit exceeded"
            );
            self.metrics.record_denied();
        }

        decision
    }

    fn fail_open_decision(&self) -> Decision {
        let reset_at = self.clock.now() + self.policy.window();
        Decision {
            remaining: self.policy.max_requests(),
            ..self.policy.decide(0, reset_at)
        }
    }

    /// Seconds until the window behind `decision` resets, for `Retry-After`.
    pub fn retry_after_secs(&self, decision: &Decision) -> u64 {
        decision.retry_after_secs(self.clock.now(), self.policy.window_secs())
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Get the metrics tracker.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get the counter store.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryCounterStore;
    use crate::infrastructure::mocks::{MockClock, UnreachableStore};
    use std::time::{Duration, UNIX_EPOCH};

    fn limiter(max: u64, window: u64, clock: &MockClock) -> RateLimiter {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryCounterStore::new(Arc::clone(&clock)));
        RateLimiter::new(
            Policy::new(max, window, "test").unwrap(),
            store,
            clock,
            Metrics::new(),
        )
    }

    fn from_ip(ip: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", ip.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_window_accounting() {
        let clock = MockClock::at_epoch_secs(1_000);
        let limiter = limiter(5, 60, &clock);
        let headers = from_ip("10.0.0.1");

        for n in 1..=5 {
            let decision = limiter.check(&headers, None).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 5 - n);
            assert_eq!(decision.reset_at_epoch_secs, 1_060);
        }
    }

    #[tokio::test]
    async fn test_boundary() {
        let clock = MockClock::at_epoch_secs(1_000);
        let limiter = limiter(3, 60, &clock);
        let headers = from_ip("10.0.0.1");

        for _ in 0..3 {
            assert!(limiter.check(&headers, None).await.allowed);
        }
        let denied = limiter.check(&headers, None).await;
        assert!(denied.is_denied());
        assert_eq!(denied.remaining, 0);

        assert_eq!(limiter.metrics().requests_allowed(), 3);
        assert_eq!(limiter.metrics().requests_denied(), 1);
    }

    #[tokio::test]
    async fn test_window_reset() {
        let clock = MockClock::at_epoch_secs(1_000);
        let limiter = limiter(1, 60, &clock);
        let headers = from_ip("10.0.0.1");

        assert!(limiter.check(&headers, None).await.allowed);
        assert!(limiter.check(&headers, None).await.is_denied());

        clock.advance(Duration::from_secs(60));

        let fresh = limiter.check(&headers, None).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 0);
        assert_eq!(fresh.reset_at_epoch_secs, 1_120);
    }

    #[tokio::test]
    async fn test_key_isolation() {
        let clock = MockClock::at_epoch_secs(1_000);
        let limiter = limiter(1, 60, &clock);

        assert!(limiter.check(&from_ip("1.1.1.1"), None).await.allowed);
        assert!(limiter.check(&from_ip("2.2.2.2"), None).await.allowed);
        assert!(limiter.check(&from_ip("1.1.1.1"), Some("user-7")).await.allowed);
    }

    #[tokio::test]
    async fn test_retry_after() {
        let clock = MockClock::at_epoch_secs(1_000);
        let limiter = limiter(1, 60, &clock);
        let headers = from_ip("10.0.0.1");

        limiter.check(&headers, None).await;
        clock.advance(Duration::from_millis(20_500));
        let denied = limiter.check(&headers, None).await;

        assert!(denied.is_denied());
        assert_eq!(limiter.retry_after_secs(&denied), 40);
    }

    #[tokio::test]
    async fn test_retry_after_window_opened_mid_second() {
        let clock = MockClock::new(UNIX_EPOCH + Duration::from_millis(1_000_500));
        let limiter = limiter(1, 60, &clock);
        let headers = from_ip("10.0.0.1");

        limiter.check(&headers, None).await;
        clock.set(UNIX_EPOCH + Duration::from_millis(1_030_600));
        let denied = limiter.check(&headers, None).await;

        assert!(denied.is_denied());
        assert_eq!(denied.reset_at_epoch_secs, 1_061);
        assert_eq!(limiter.retry_after_secs(&denied), 30);

        clock.set(UNIX_EPOCH + Duration::from_millis(1_030_400));
        assert_eq!(limiter.retry_after_secs(&denied), 31);
    }

    #[tokio::test]
    async fn test_store_error_fails_open() {
        let clock = MockClock::at_epoch_secs(1_000);
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let limiter = RateLimiter::new(
            Policy::new(1, 60, "test").unwrap(),
            Arc::new(UnreachableStore::new()),
            clock_dyn,
            Metrics::new(),
        );
        let headers = from_ip("10.0.0.1");

        for _ in 0..5 {
            let decision = limiter.check(&headers, None).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1);
            assert_eq!(decision.reset_at_epoch_secs, 1_060);
        }
        assert_eq!(limiter.metrics().fail_open(), 5);
    }

    #[test]
    fn test_debug_names_backend() {
        let clock = MockClock::new(UNIX_EPOCH);
        let limiter = limiter(1, 60, &clock);
        assert!(format!("{:?}", limiter).contains("memory"));
    }
}
