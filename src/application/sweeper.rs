//! Periodic cleanup of expired in-memory windows.
//!
//! Without sweeping, every client that ever hit the process leaves a counter
//! behind. The sweeper runs on the tokio runtime and is stopped through the
//! handle returned by [`Sweeper::start`].

use crate::application::ports::PurgeExpired;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Error returned when sweeper configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SweeperConfigError {
    /// Sweep interval must be greater than zero
    #[error("sweep interval must be greater than 0")]
    ZeroInterval,
}

/// Error returned when the sweeper task did not stop cleanly.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The sweeper task panicked
    #[error("sweeper task panicked")]
    TaskPanicked,
    /// The sweeper task was aborted before it could stop
    #[error("sweeper task was cancelled")]
    TaskCancelled,
}

/// Periodically purges expired windows from a store.
#[derive(Debug)]
pub struct Sweeper {
    store: Arc<dyn PurgeExpired>,
    interval: Duration,
}

impl Sweeper {
    /// Create a new sweeper.
    ///
    /// # Errors
    /// Returns `SweeperConfigError::ZeroInterval` if `interval` is zero.
    pub fn new(store: Arc<dyn PurgeExpired>, interval: Duration) -> Result<Self, SweeperConfigError> {
        if interval.is_zero() {
            return Err(SweeperConfigError::ZeroInterval);
        }
        Ok(Self { store, interval })
    }

    /// Purge once, outside the background loop.
    pub fn sweep(&self) -> usize {
        let purged = self.store.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired rate limit windows");
        }
        purged
    }

    /// Spawn the background sweep loop on the current tokio runtime.
    ///
    /// The first sweep happens one interval after start.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                }
            }
        });

        SweeperHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    /// Get the sweep interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Handle to a running sweeper.
///
/// Dropping the handle also stops the sweeper, but without waiting for it.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to finish.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the task panicked or was aborted.
    pub async fn shutdown(mut self) -> Result<(), ShutdownError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The task may already be gone; join reports why
            let _ = tx.send(());
        }

        self.task.await.map_err(|e| {
            if e.is_panic() {
                ShutdownError::TaskPanicked
            } else {
                ShutdownError::TaskCancelled
            }
        })
    }

    /// Check if the sweeper task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
