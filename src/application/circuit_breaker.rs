//! Circuit breaker guarding the shared counter backend.
//!
//! When the shared backend keeps failing, every request would otherwise pay
//! the full backend timeout before falling back to in-memory counting. The
//! breaker trips after a run of consecutive failures and routes increments
//! straight to the fallback until a recovery period has passed, then lets a
//! single trial call through.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Backend is healthy, calls go through
    Closed = 0,
    /// Backend is failing, calls are skipped
    Open = 1,
    /// Recovery period elapsed, one trial call is in flight
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive backend failures before the circuit opens
    pub failure_threshold: u32,
    /// How long to skip the backend before trying it again
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Lock-free circuit breaker for backend calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    last_attempt_nanos: AtomicU64,
    config: CircuitBreakerConfig,
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    ///
    /// A zero failure threshold is treated as one.
    pub fn with_config(mut config: CircuitBreakerConfig) -> Self {
        config.failure_threshold = config.failure_threshold.max(1);
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            last_attempt_nanos: AtomicU64::new(0),
            config,
            epoch: Instant::now(),
        }
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check whether the backend should be called.
    ///
    /// Returns `false` while the circuit is open; the caller then goes
    /// straight to the fallback store. Once the recovery period has passed,
    /// exactly one caller gets `true` for the trial call and everyone else
    /// keeps using the fallback until that call is recorded. A trial call
    /// that never reports back is replaced after another recovery period.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open | CircuitState::HalfOpen => {
                let since = self.last_attempt_nanos.load(Ordering::Acquire);
                let elapsed = Instant::now()
                    .saturating_duration_since(self.epoch + Duration::from_nanos(since));
                if elapsed < self.config.recovery_timeout {
                    return false;
                }

                // Only the caller that moves the timestamp makes the trial call
                let claimed = self
                    .last_attempt_nanos
                    .compare_exchange(since, self.nanos_now(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if claimed {
                    self.state
                        .store(CircuitState::HalfOpen as u8, Ordering::Release);
                }
                claimed
            }
        }
    }

    /// Record a successful backend call.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self.state() == CircuitState::HalfOpen {
            self.state
                .store(CircuitState::Closed as u8, Ordering::Release);
        }
    }

    /// Record a failed backend call.
    ///
    /// # Returns
    /// `true` if this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        self.mark_now();

        match self.state() {
            CircuitState::HalfOpen => {
                self.state
                    .store(CircuitState::Open as u8, Ordering::Release);
                true
            }
            CircuitState::Closed if failures >= u64::from(self.config.failure_threshold) => self
                .state
                .compare_exchange(
                    CircuitState::Closed as u8,
                    CircuitState::Open as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok(),
            _ => false,
        }
    }

    fn nanos_now(&self) -> u64 {
        Instant::now()
            .duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    fn mark_now(&self) {
        self.last_attempt_nanos
            .store(self.nanos_now(), Ordering::Release);
    }

    /// Get the number of consecutive failures.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Get the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
