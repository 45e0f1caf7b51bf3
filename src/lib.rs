//! # http-throttle
//!
//! Fixed-window HTTP rate limiting for `tower` and `axum`, with a shared Redis
//! backend and an in-memory fallback.
//!
//! Each request is mapped to a key (`{policy prefix}:{client identity}`), the
//! key's counter in the current window is incremented, and the request is
//! allowed while the count stays within the policy's limit. Denied requests
//! get a `429 Too Many Requests` with `Retry-After` and `X-RateLimit-*`
//! headers; allowed ones carry `X-RateLimit-*` headers on the response.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::{get, post}, Router};
//! use http_throttle::{Metrics, RateLimitLayer, RateLimiterRegistry, Settings, SystemClock};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! // RATE_LIMIT_REDIS_URL and RATE_LIMIT_REDIS_TOKEN select the shared backend
//! let settings = Settings::from_env()?;
//! let clock = Arc::new(SystemClock::new());
//! let metrics = Metrics::new();
//! let stores = settings.counter_stores(clock.clone(), metrics.clone()).await;
//!
//! let registry = RateLimiterRegistry::with_defaults(stores.counter, clock, metrics);
//! let edge = registry.limiter("edge").expect("edge preset is registered");
//! let strict = registry.limiter("strict").expect("strict preset is registered");
//!
//! let app: Router = Router::new()
//!     .route("/api/items", get(|| async { "items" }))
//!     .route(
//!         "/api/upload",
//!         post(|| async { "stored" }).route_layer(RateLimitLayer::new(strict)),
//!     )
//!     .layer(RateLimitLayer::edge(edge));
//! # Ok(())
//! # }
//! ```
//!
//! ## Policies
//!
//! A [`Policy`] is a request ceiling, a window length and a key prefix. The
//! request that brings a window's count to the ceiling is still allowed; the
//! next one is denied until the window ends. Presets live in [`presets`]:
//!
//! | Name       | Limit | Window | Prefix    |
//! |------------|-------|--------|-----------|
//! | `edge`     | 200   | 60s    | `edge`    |
//! | `standard` | 100   | 60s    | `api`     |
//! | `auth`     | 10    | 60s    | `auth`    |
//! | `strict`   | 10    | 60s    | `upload`  |
//! | `contact`  | 5     | 3600s  | `contact` |
//!
//! Policies with different prefixes never share counters, so a request
//! passing through an edge layer and a route layer is counted once by each.
//!
//! ## Client Identity
//!
//! The client is the first address in `X-Forwarded-For`, else `X-Real-IP`.
//! Values that are not IP addresses are ignored, and requests without a usable
//! address share the `unknown` bucket. Layers built with
//! [`RateLimitLayer::per_principal`] key on the [`AuthenticatedPrincipal`]
//! request extension instead.
//!
//! ## Backends
//!
//! - **Memory** ([`MemoryCounterStore`]): DashMap-backed, per process. Expired
//!   windows are purged by a [`Sweeper`].
//! - **Redis** (`RedisCounterStore`, feature `redis-store`): one atomic script
//!   per increment, shared across instances, bounded by a short timeout.
//! - **Fallback** ([`FallbackCounterStore`]): Redis first; on error or timeout
//!   the increment is counted in memory and a circuit breaker keeps traffic
//!   off the backend until it has had time to recover.
//!
//! ## Fail-Safe Operation
//!
//! Backend trouble never turns into an error response. A store error degrades
//! to the in-memory store, or, if no fallback is configured, the request is
//! allowed with a full quota. A computed denial is always enforced.
//!
//! ## Observability
//!
//! ```rust,no_run
//! # use http_throttle::RateLimiterRegistry;
//! # fn report(registry: &RateLimiterRegistry) {
//! let snapshot = registry.metrics().snapshot();
//! println!("Allowed: {}", snapshot.requests_allowed);
//! println!("Denied: {}", snapshot.requests_denied);
//! println!("Backend fallbacks: {}", snapshot.backend_fallbacks);
//! println!("Denial rate: {:.2}%", snapshot.denial_rate() * 100.0);
//! # }
//! ```

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    key::{client_identity, client_ip, derive_key},
    policy::{presets, Decision, Policy, PolicyError},
    window::WindowCount,
};

pub use application::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    fallback::FallbackCounterStore,
    limiter::RateLimiter,
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, CounterStore, PurgeExpired, StoreError},
    registry::RateLimiterRegistry,
    sweeper::{ShutdownError, Sweeper, SweeperConfigError, SweeperHandle},
};

pub use infrastructure::{
    clock::SystemClock,
    layer::{AuthenticatedPrincipal, RateLimitLayer, RateLimitService},
    memory_store::MemoryCounterStore,
    response::{decorate, too_many_requests},
    settings::{CounterStores, Settings, SettingsError},
};

#[cfg(feature = "redis-store")]
pub use infrastructure::redis_store::{RedisCounterStore, RedisStoreConfig};
