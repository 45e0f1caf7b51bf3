//! Named rate limiters sharing one counter store.
//!
//! The registry is built once by the composition root and handed to whatever
//! assembles the HTTP stack. Nothing here is process-global, so tests build
//! isolated registries freely.

use crate::application::limiter::RateLimiter;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, CounterStore};
use crate::domain::policy::{presets, Policy};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Registry of named policies bound to a shared store, clock and metrics.
#[derive(Clone)]
pub struct RateLimiterRegistry {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    policies: BTreeMap<String, Policy>,
}

impl fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("backend", &self.store.backend())
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl RateLimiterRegistry {
    /// Create an empty registry.
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, metrics: Metrics) -> Self {
        Self {
            store,
            clock,
            metrics,
            policies: BTreeMap::new(),
        }
    }

    /// Create a registry with every preset registered under its name.
    pub fn with_defaults(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        presets::ALL
            .into_iter()
            .fold(Self::new(store, clock, metrics), |registry, (name, policy)| {
                registry.with_policy(name, policy)
            })
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_policy(mut self, name: impl Into<String>, policy: Policy) -> Self {
        self.register(name, policy);
        self
    }

    /// Register or replace a named policy.
    ///
    /// # Returns
    /// The policy previously registered under `name`, if any.
    pub fn register(&mut self, name: impl Into<String>, policy: Policy) -> Option<Policy> {
        self.policies.insert(name.into(), policy)
    }

    /// Build a limiter for a named policy.
    pub fn limiter(&self, name: &str) -> Option<RateLimiter> {
        self.policies.get(name).map(|policy| {
            RateLimiter::new(
                policy.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.clock),
                self.metrics.clone(),
            )
        })
    }

    /// Look up a named policy.
    pub fn policy(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Registered policy names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Check if no policies are registered.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Metrics shared by every limiter from this registry.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The shared counter store.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }
}
