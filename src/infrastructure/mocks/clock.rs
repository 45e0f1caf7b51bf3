//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Mock wall clock for testing.
///
/// Lets tests place requests at exact Unix timestamps, so window boundaries
/// and reported reset times are deterministic.
///
/// # Examples
///
/// ```
/// use http_throttle::infrastructure::mocks::MockClock;
/// use http_throttle::application::ports::Clock;
/// use std::time::{Duration, UNIX_EPOCH};
///
/// let clock = MockClock::at_epoch_secs(1_000);
/// assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(1_000));
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(1_010));
/// ```
///
/// All clones share the same underlying time, so advancing one clone
/// advances every store and limiter holding another.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<SystemTime>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific time.
    pub fn new(start: SystemTime) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a mock clock starting `secs` seconds after the Unix epoch.
    pub fn at_epoch_secs(secs: u64) -> Self {
        Self::new(UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut time = self
            .current_time
            .lock()
            .expect("MockClock mutex poisoned");
        *time += duration;
    }

    /// Set the clock to a specific time.
    pub fn set(&self, time: SystemTime) {
        *self
            .current_time
            .lock()
            .expect("MockClock mutex poisoned") = time;
    }
}

impl Clock for MockClock {
    fn now(&self) -> SystemTime {
        *self
            .current_time
            .lock()
            .expect("MockClock mutex poisoned")
    }
}
