//! Fixed-window rate limiting policies.
//!
//! A policy is pure configuration: how many requests a single key may make
//! per window, and the prefix that namespaces its keys inside a shared
//! counter store. Named presets live in [`presets`].

use crate::domain::window::{epoch_secs_ceil, secs_until_ceil};
use std::borrow::Cow;
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Error returned when a policy is configured with invalid parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Window length must be at least one second
    #[error("window length must be greater than 0 seconds")]
    ZeroWindow,
    /// Key prefix must not be empty
    #[error("key prefix must not be empty")]
    EmptyPrefix,
    /// Key prefix must not contain the key separator
    #[error("key prefix {0:?} must not contain ':'")]
    InvalidPrefix(String),
}

/// A fixed-window rate limiting policy.
///
/// Allows `max_requests` per key in each window of `window_secs` seconds.
/// The request that brings the count to exactly `max_requests` is allowed;
/// the next one in the same window is denied.
///
/// # Example
/// ```
/// use http_throttle::Policy;
/// use std::time::SystemTime;
///
/// let policy = Policy::new(2, 60, "api").unwrap();
/// assert!(policy.decide(1, SystemTime::UNIX_EPOCH).allowed);
/// assert!(policy.decide(2, SystemTime::UNIX_EPOCH).allowed);
/// assert!(!policy.decide(3, SystemTime::UNIX_EPOCH).allowed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Policy {
    max_requests: u64,
    window_secs: u64,
    key_prefix: Cow<'static, str>,
}

impl Policy {
    /// Create a validated policy.
    ///
    /// # Errors
    /// Returns `PolicyError` if the window is zero or the prefix is empty or
    /// contains `:`.
    pub fn new(
        max_requests: u64,
        window_secs: u64,
        key_prefix: impl Into<Cow<'static, str>>,
    ) -> Result<Self, PolicyError> {
        let key_prefix = key_prefix.into();
        if window_secs == 0 {
            return Err(PolicyError::ZeroWindow);
        }
        if key_prefix.trim().is_empty() {
            return Err(PolicyError::EmptyPrefix);
        }
        if key_prefix.contains(':') {
            return Err(PolicyError::InvalidPrefix(key_prefix.into_owned()));
        }
        Ok(Self {
            max_requests,
            window_secs,
            key_prefix,
        })
    }

    /// Const constructor for compile-time presets.
    ///
    /// Callers are responsible for passing a non-zero window and a valid
    /// prefix; prefer [`Policy::new`] for runtime configuration.
    pub const fn preset(max_requests: u64, window_secs: u64, key_prefix: &'static str) -> Self {
        Self {
            max_requests,
            window_secs,
            key_prefix: Cow::Borrowed(key_prefix),
        }
    }

    /// Maximum requests allowed per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Window length in seconds.
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Prefix namespacing this policy's keys.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Turn the post-increment count of a window into a decision.
    pub fn decide(&self, count: u64, reset_at: SystemTime) -> Decision {
        Decision {
            allowed: count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(count),
            reset_at,
            reset_at_epoch_secs: epoch_secs_ceil(reset_at),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} requests / {}s",
            self.key_prefix, self.max_requests, self.window_secs
        )
    }
}

/// Outcome of a single rate limit check.
///
/// Computed fresh for every request and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The policy's request ceiling
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window ends
    pub reset_at: SystemTime,
    /// `reset_at` in seconds since the Unix epoch, rounded up
    pub reset_at_epoch_secs: u64,
}

impl Decision {
    /// Check if this decision allows the request.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Check if this decision denies the request.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Seconds a denied client should wait before retrying.
    ///
    /// Time left until `reset_at`, rounded up, never below 1 and never above
    /// the window length.
    pub fn retry_after_secs(&self, now: SystemTime, window_secs: u64) -> u64 {
        secs_until_ceil(now, self.reset_at).clamp(1, window_secs.max(1))
    }
}

/// Named policy presets shared by call sites.
///
/// Adding a tier means adding a constant here; the limiter itself never
/// changes.
pub mod presets {
    use super::Policy;

    /// Blanket per-IP policy applied at the edge to nearly all API traffic.
    pub const EDGE: Policy = Policy::preset(200, 60, "edge");

    /// General API traffic.
    pub const STANDARD: Policy = Policy::preset(100, 60, "api");

    /// Login and token endpoints.
    pub const AUTH: Policy = Policy::preset(10, 60, "auth");

    /// Expensive operations such as file uploads.
    pub const STRICT: Policy = Policy::preset(10, 60, "upload");

    /// Public contact-sales form.
    pub const CONTACT: Policy = Policy::preset(5, 3600, "contact");

    /// All presets with their registry names.
    pub const ALL: [(&str, Policy); 5] = [
        ("edge", EDGE),
        ("standard", STANDARD),
        ("auth", AUTH),
        ("strict", STRICT),
        ("contact", CONTACT),
    ];
}
