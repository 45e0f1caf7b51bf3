//! Shared-backend counter store with in-memory degradation.
//!
//! Increments go to the shared backend while it is healthy. Any backend error
//! or timeout is logged and the same increment is served by a process-local
//! store instead, so backend trouble never reaches the request.

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::application::metrics::Metrics;
use crate::application::ports::{CounterStore, StoreError};
use crate::domain::window::WindowCount;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Counter store that prefers a shared backend and falls back to a local one.
pub struct FallbackCounterStore {
    primary: Arc<dyn CounterStore>,
    fallback: Arc<dyn CounterStore>,
    circuit_breaker: CircuitBreaker,
    metrics: Metrics,
}

impl fmt::Debug for FallbackCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackCounterStore")
            .field("primary", &self.primary.backend())
            .field("fallback", &self.fallback.backend())
            .field("circuit", &self.circuit_breaker.state())
            .finish()
    }
}

impl FallbackCounterStore {
    /// Create a fallback store with the default circuit breaker settings.
    pub fn new(
        primary: Arc<dyn CounterStore>,
        fallback: Arc<dyn CounterStore>,
        metrics: Metrics,
    ) -> Self {
        Self::with_circuit_breaker(primary, fallback, metrics, CircuitBreakerConfig::default())
    }

    /// Create a fallback store with a custom circuit breaker.
    pub fn with_circuit_breaker(
        primary: Arc<dyn CounterStore>,
        fallback: Arc<dyn CounterStore>,
        metrics: Metrics,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            circuit_breaker: CircuitBreaker::with_config(config),
            metrics,
        }
    }

    /// State of the breaker guarding the shared backend.
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// Get the circuit breaker.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    async fn increment_fallback(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCount, StoreError> {
        self.metrics.record_fallback();
        self.fallback.increment(key, window).await
    }
}

#[async_trait]
impl CounterStore for FallbackCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        if !self.circuit_breaker.allow_request() {
            return self.increment_fallback(key, window).await;
        }

        match self.primary.increment(key, window).await {
            Ok(count) => {
                self.circuit_breaker.record_success();
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %key,
                    backend = self.primary.backend(),
                    "Shared counter store failed, counting in memory"
                );
                if self.circuit_breaker.record_failure() {
                    tracing::warn!(
                        backend = self.primary.backend(),
                        recovery_timeout = ?self.circuit_breaker.config().recovery_timeout,
                        "Shared counter store disabled until recovery timeout"
                    );
                }
                self.increment_fallback(key, window).await
            }
        }
    }

    fn backend(&self) -> &'static str {
        "fallback"
    }
}
