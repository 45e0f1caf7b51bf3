//! Example HTTP server with edge and route-level rate limits.
//!
//! Every API request passes the `edge` policy (200/min per client IP), except
//! scheduled jobs under `/api/cron/` and callbacks under `/api/webhooks/`.
//! Uploads and the contact form carry stricter policies of their own.
//!
//! # Quick Start
//!
//! In-memory counting, single instance:
//! ```bash
//! cargo run --example edge_server
//! ```
//!
//! Shared counting across instances:
//! ```bash
//! docker run -p 6379:6379 redis:7-alpine --requirepass secret
//! RATE_LIMIT_REDIS_URL=redis://127.0.0.1:6379 RATE_LIMIT_REDIS_TOKEN=secret \
//!     cargo run --example edge_server
//! ```
//!
//! Then exceed the upload limit:
//! ```bash
//! for i in $(seq 1 12); do
//!     curl -s -o /dev/null -w "%{http_code}\n" -X POST \
//!         -H "X-Forwarded-For: 203.0.113.7" localhost:3000/api/upload
//! done
//! ```

use axum::routing::{get, post};
use axum::Router;
use http_throttle::{
    Clock, Metrics, PurgeExpired, RateLimitLayer, RateLimiterRegistry, Settings, Sweeper,
    SystemClock,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,http_throttle=debug")),
        )
        .init();

    let settings = Settings::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let metrics = Metrics::new();

    let stores = settings.counter_stores(clock.clone(), metrics.clone()).await;
    let memory: Arc<dyn PurgeExpired> = stores.memory.clone();
    let sweeper = Sweeper::new(memory, settings.sweep_interval())?.start();

    let registry = RateLimiterRegistry::with_defaults(stores.counter, clock, metrics.clone());
    let limiter = |name: &str| {
        registry
            .limiter(name)
            .ok_or_else(|| format!("policy {name} is not registered"))
    };

    let upload = RateLimitLayer::new(limiter("strict")?)
        .with_message("Upload limit reached, please wait before uploading again");
    let contact = RateLimitLayer::new(limiter("contact")?)
        .with_message("Too many submissions, please try again later");

    let app = Router::new()
        .route("/api/items", get(|| async { "items" }))
        .route("/api/upload", post(|| async { "stored" }).route_layer(upload))
        .route("/api/contact", post(|| async { "thanks" }).route_layer(contact))
        .route("/api/cron/cleanup", post(|| async { "cleaned" }))
        .route("/api/webhooks/payments", post(|| async { "received" }))
        .layer(RateLimitLayer::edge(limiter("edge")?));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    info!(address = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    sweeper.shutdown().await?;

    let snapshot = metrics.snapshot();
    info!(
        allowed = snapshot.requests_allowed,
        denied = snapshot.requests_denied,
        fallbacks = snapshot.backend_fallbacks,
        "Rate limiting summary"
    );

    Ok(())
}
