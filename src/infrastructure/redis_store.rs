//! Redis-backed counter store.
//!
//! Provides a shared counter backend so that every application instance
//! behind a load balancer enforces the same limits.
//!
//! ## Architecture
//!
//! - Keys: `{key_prefix}{policy_prefix}:{identity}`
//! - Values: plain integer counters
//! - Expiry: the key's TTL *is* the window; Redis drops it when the window
//!   ends and the next increment starts a new one
//!
//! A single Lua script runs `INCR`, sets the TTL on the first increment of a
//! window, and reads the remaining TTL. Redis executes scripts atomically, so
//! concurrent increments from any number of instances are totally ordered.
//!
//! ## Error Handling
//!
//! Every round trip is bounded by [`RedisStoreConfig::timeout`]. Errors and
//! timeouts are returned as [`StoreError`]; pair this store with
//! `FallbackCounterStore` to degrade to in-memory counting instead.
//!
//! ## Example
//!
//! ```rust,ignore
//! use http_throttle::{RedisCounterStore, RedisStoreConfig, SystemClock};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let clock = Arc::new(SystemClock::new());
//!     let store = RedisCounterStore::connect(
//!         "rediss://default@eu1-example.upstash.io:6379",
//!         Some("access-token"),
//!         RedisStoreConfig::default(),
//!         clock,
//!     )
//!     .await
//!     .expect("Failed to connect to Redis");
//! }
//! ```

use crate::application::ports::{Clock, CounterStore, StoreError};
use crate::domain::window::WindowCount;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo, Script};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Configuration for Redis storage.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Upper bound on one increment round trip (default: 300ms)
    pub timeout: Duration,
    /// Prefix for every Redis key (default: "http-throttle:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(300),
            key_prefix: "http-throttle:".to_string(),
        }
    }
}

/// Redis-backed fixed-window counters shared across instances.
///
/// The connection is established on first use and kept afterwards; the
/// connection manager reconnects on its own once it exists. Until the first
/// connection succeeds, every increment retries it and reports an error.
#[derive(Clone)]
pub struct RedisCounterStore {
    client: Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    script: Arc<Script>,
    config: RedisStoreConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Create a store without connecting.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    /// * `token` - Access token, sent as the connection password
    /// * `config` - Storage configuration
    /// * `clock` - Time source used to turn TTLs into reset times
    ///
    /// # Errors
    /// Returns error if the URL is invalid.
    pub fn new(
        url: &str,
        token: Option<&str>,
        config: RedisStoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let mut info = url.into_connection_info()?;
        if let Some(token) = token {
            info.redis.password = Some(token.to_string());
        }

        Ok(Self {
            client: Client::open(info)?,
            connection: Arc::new(OnceCell::new()),
            script: Arc::new(Script::new(INCREMENT_SCRIPT)),
            config,
            clock,
        })
    }

    /// Create a store and connect immediately.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the initial connection fails
    /// within the configured timeout.
    pub async fn connect(
        url: &str,
        token: Option<&str>,
        config: RedisStoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let store = Self::new(url, token, config, clock)?;
        store.ensure_connected().await?;
        Ok(store)
    }

    /// Establish the connection if it does not exist yet.
    ///
    /// # Errors
    /// Returns error if Redis cannot be reached within the configured timeout.
    pub async fn ensure_connected(&self) -> Result<(), StoreError> {
        self.connection().await.map(|_| ())
    }

    /// Check if a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let timeout = self.config.timeout;
        let client = self.client.clone();

        self.connection
            .get_or_try_init(|| async move {
                match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
                    Ok(connected) => connected.map_err(StoreError::from),
                    Err(_) => Err(StoreError::Timeout(timeout)),
                }
            })
            .await
            .cloned()
    }

    /// Get the Redis key for a rate limit key.
    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    async fn run_script(&self, key: &str, window: Duration) -> Result<(u64, i64), StoreError> {
        let mut conn = self.connection().await?;
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply = self
            .script
            .key(self.redis_key(key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(reply)
    }

    /// Delete every key under this store's prefix.
    ///
    /// Intended for tests and maintenance; uses `SCAN`, never `KEYS`.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.config.key_prefix);
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<()>(&mut conn)
                    .await?;
            }

            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }

    /// Get the store configuration.
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let (count, ttl_ms) = tokio::time::timeout(self.config.timeout, self.run_script(key, window))
            .await
            .map_err(|_| StoreError::Timeout(self.config.timeout))??;

        let ttl_ms = u64::try_from(ttl_ms).map_err(|_| {
            StoreError::InvalidReply(format!("negative TTL {} for {}", ttl_ms, key))
        })?;

        Ok(WindowCount {
            count,
            reset_at: self.clock.now() + Duration::from_millis(ttl_ms),
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
