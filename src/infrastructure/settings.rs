//! Runtime settings and counter store selection.
//!
//! Settings come from an optional TOML file overlaid with environment
//! variables prefixed `RATE_LIMIT_`:
//!
//! | Variable                           | Default          |
//! |------------------------------------|------------------|
//! | `RATE_LIMIT_REDIS_URL`             | unset            |
//! | `RATE_LIMIT_REDIS_TOKEN`           | unset            |
//! | `RATE_LIMIT_BACKEND_TIMEOUT_MS`    | `300`            |
//! | `RATE_LIMIT_SWEEP_INTERVAL_SECS`   | `60`             |
//! | `RATE_LIMIT_FAILURE_THRESHOLD`     | `3`              |
//! | `RATE_LIMIT_RECOVERY_TIMEOUT_SECS` | `30`             |
//! | `RATE_LIMIT_KEY_PREFIX`            | `http-throttle:` |
//!
//! The shared backend is used only when both URL and token are set; otherwise
//! the process counts in memory.

use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, CounterStore};
use crate::infrastructure::memory_store::MemoryCounterStore;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "redis-store")]
use crate::application::fallback::FallbackCounterStore;
#[cfg(feature = "redis-store")]
use crate::infrastructure::redis_store::{RedisCounterStore, RedisStoreConfig};

/// Environment variable prefix, without the trailing separator.
pub const ENV_PREFIX: &str = "RATE_LIMIT";

/// Error returned when settings cannot be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A source could not be read or deserialized
    #[error("failed to load rate limit settings: {0}")]
    Config(#[from] ConfigError),
    /// A value was read but is unusable
    #[error("invalid rate limit setting `{field}`: {reason}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Rate limiting settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Shared backend URL
    pub redis_url: Option<String>,
    /// Shared backend access token
    pub redis_token: Option<String>,
    /// Upper bound on one shared backend round trip
    pub backend_timeout_ms: u64,
    /// How often expired in-memory windows are purged
    pub sweep_interval_secs: u64,
    /// Consecutive backend failures before the backend is skipped
    pub failure_threshold: u32,
    /// How long the backend is skipped before it is tried again
    pub recovery_timeout_secs: u64,
    /// Prefix for every shared backend key
    pub key_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_token: None,
            backend_timeout_ms: 300,
            sweep_interval_secs: 60,
            failure_threshold: 3,
            recovery_timeout_secs: 30,
            key_prefix: "http-throttle:".to_string(),
        }
    }
}

/// Counter stores chosen by [`Settings::counter_stores`].
#[derive(Debug, Clone)]
pub struct CounterStores {
    /// Store limiters should count in
    pub counter: Arc<dyn CounterStore>,
    /// Process-local store to hand to the sweeper
    pub memory: Arc<MemoryCounterStore>,
}

impl Settings {
    /// Load settings from the environment only.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::load(None)
    }

    /// Load settings from an optional file, then the environment.
    ///
    /// A missing file is an error when a path is given explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder.add_source(Self::environment()).build()?;
        Self::from_config(config)
    }

    /// Environment source for `RATE_LIMIT_*` variables.
    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
    }

    /// Deserialize and validate already-built configuration.
    pub fn from_config(config: Config) -> Result<Self, SettingsError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.backend_timeout_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "backend_timeout_ms",
                reason: "must be greater than 0",
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(SettingsError::Invalid {
                field: "sweep_interval_secs",
                reason: "must be greater than 0",
            });
        }
        Ok(())
    }

    /// URL and token of the shared backend, if both are set and non-blank.
    pub fn shared_backend(&self) -> Option<(&str, &str)> {
        let url = self.redis_url.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let token = self.redis_token.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some((url, token))
    }

    /// Backend round trip timeout.
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    /// Sweep interval for the in-memory store.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Circuit breaker configuration for the shared backend.
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
        }
    }

    /// Build the counter stores these settings describe.
    ///
    /// With a shared backend configured, counts go to Redis and fall back to
    /// memory while it fails, including when it is down at startup. Without
    /// one, counts stay in memory. Neither case is an error.
    pub async fn counter_stores(&self, clock: Arc<dyn Clock>, metrics: Metrics) -> CounterStores {
        let memory = Arc::new(MemoryCounterStore::new(Arc::clone(&clock)));
        let local = CounterStores {
            counter: memory.clone(),
            memory: memory.clone(),
        };

        let Some((url, token)) = self.shared_backend() else {
            tracing::info!("No shared rate limit backend configured, counting in memory");
            return local;
        };

        self.connect_shared(url, token, clock, metrics, local).await
    }

    #[cfg(feature = "redis-store")]
    async fn connect_shared(
        &self,
        url: &str,
        token: &str,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        local: CounterStores,
    ) -> CounterStores {
        let config = RedisStoreConfig {
            timeout: self.backend_timeout(),
            key_prefix: self.key_prefix.clone(),
        };

        let redis = match RedisCounterStore::new(url, Some(token), config, clock) {
            Ok(redis) => redis,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Invalid Redis rate limit backend URL, counting in memory"
                );
                return local;
            }
        };

        // An unreachable backend is retried through the circuit breaker
        match redis.ensure_connected().await {
            Ok(()) => tracing::info!(
                timeout_ms = self.backend_timeout_ms,
                "Using Redis rate limit backend with in-memory fallback"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                "Redis rate limit backend unreachable, counting in memory until it recovers"
            ),
        }

        let counter = FallbackCounterStore::with_circuit_breaker(
            Arc::new(redis),
            local.memory.clone(),
            metrics,
            self.circuit_breaker_config(),
        );
        CounterStores {
            counter: Arc::new(counter),
            memory: local.memory,
        }
    }

    #[cfg(not(feature = "redis-store"))]
    async fn connect_shared(
        &self,
        _url: &str,
        _token: &str,
        _clock: Arc<dyn Clock>,
        _metrics: Metrics,
        local: CounterStores,
    ) -> CounterStores {
        tracing::warn!("Redis rate limit backend configured but redis-store is disabled, counting in memory");
        local
    }
}
