//! Fixed-window counters.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Result of incrementing a key's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Count after the increment, including it
    pub count: u64,
    /// When the window containing this increment ends
    pub reset_at: SystemTime,
}

impl WindowCount {
    /// Reset time in whole seconds since the Unix epoch, rounded up.
    pub fn reset_at_epoch_secs(&self) -> u64 {
        epoch_secs_ceil(self.reset_at)
    }
}

/// Counter for one key inside one fixed window.
///
/// The count only grows while `now < window_start + window`. The first
/// increment after the window elapses replaces the window instead of
/// decrementing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCounter {
    count: u64,
    window_start: SystemTime,
    window: Duration,
}

impl WindowCounter {
    /// Open an empty window starting at `now`.
    pub fn new(now: SystemTime, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            window,
        }
    }

    /// Register one request at `now`, starting a fresh window if the current
    /// one has elapsed.
    pub fn increment(&mut self, now: SystemTime, window: Duration) -> WindowCount {
        if self.is_expired(now) {
            self.count = 0;
            self.window_start = now;
            self.window = window;
        }
        self.count = self.count.saturating_add(1);

        WindowCount {
            count: self.count,
            reset_at: self.reset_at(),
        }
    }

    /// Whether the window has elapsed at `now`.
    ///
    /// A clock that moved backwards keeps the current window active.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.reset_at()
    }

    /// Current count.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// When this window started.
    pub fn window_start(&self) -> SystemTime {
        self.window_start
    }

    /// When this window ends.
    pub fn reset_at(&self) -> SystemTime {
        self.window_start + self.window
    }
}

/// Seconds since the Unix epoch, rounded up.
pub(crate) fn epoch_secs_ceil(time: SystemTime) -> u64 {
    let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    if since.subsec_nanos() > 0 {
        since.as_secs() + 1
    } else {
        since.as_secs()
    }
}

/// Whole seconds from `from` until `to`, rounded up; zero if `to` has passed.
pub(crate) fn secs_until_ceil(from: SystemTime, to: SystemTime) -> u64 {
    let left = to.duration_since(from).unwrap_or_default();
    if left.subsec_nanos() > 0 {
        left.as_secs() + 1
    } else {
        left.as_secs()
    }
}
