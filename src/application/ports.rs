//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::window::WindowCount;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Port for obtaining current time.
///
/// Wall-clock time is used because window resets are reported to clients as
/// Unix timestamps. Infrastructure provides `SystemClock`; tests use
/// `MockClock`.
pub trait Clock: Send + Sync + Debug {
    /// Get the current time.
    fn now(&self) -> SystemTime;
}

/// Errors a counter store can report.
///
/// Only shared backends produce these; the in-memory store is infallible.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend did not answer within the configured timeout
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
    /// The backend could not be reached or rejected the command
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with something we could not interpret
    #[error("unexpected counter store reply: {0}")]
    InvalidReply(String),
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Port for keyed fixed-window counters with expiry.
///
/// Implementations must make `increment` atomic per key: concurrent callers
/// for the same key each observe a distinct count.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Increment the counter for `key`, opening a new window of length
    /// `window` when none is active.
    ///
    /// # Returns
    /// The count including this increment and the end of its window.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Short backend name for logs and diagnostics.
    fn backend(&self) -> &'static str;
}

/// Port for stores that hold expired windows until told to drop them.
///
/// Shared backends expire keys on their own and do not implement this.
pub trait PurgeExpired: Send + Sync + Debug {
    /// Drop every window that has elapsed.
    ///
    /// # Returns
    /// The number of windows removed.
    fn purge_expired(&self) -> usize;
}
