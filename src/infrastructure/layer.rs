//! Tower integration layer.
//!
//! Provides a `tower::Layer` that applies a [`RateLimiter`] to HTTP requests.
//! Allowed requests reach the inner service and get rate limit headers on
//! the way out; denied requests are answered with 429 without touching the
//! inner service.
//!
//! Layers nest. A global edge layer on the router and a stricter layer on a
//! single route both count every request; the response carries the headers
//! of the innermost layer that allowed it.

use crate::application::limiter::RateLimiter;
use crate::infrastructure::response::{decorate, too_many_requests, DEFAULT_DENIAL_MESSAGE};
use axum::response::Response;
use http::Request;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Path prefixes exempted by [`RateLimitLayer::edge`].
///
/// Scheduled jobs and third-party callbacks arrive from a few fixed
/// addresses in bursts and must not be throttled like client traffic.
pub const EDGE_EXEMPT_PREFIXES: [&str; 2] = ["/api/cron/", "/api/webhooks/"];

/// Authenticated principal for per-principal limiting.
///
/// Authentication middleware inserts this as a request extension. Layers
/// built with [`RateLimitLayer::per_principal`] key on it instead of the
/// client IP.
///
/// ```rust
/// use http_throttle::AuthenticatedPrincipal;
///
/// let mut request = http::Request::new(());
/// request
///     .extensions_mut()
///     .insert(AuthenticatedPrincipal("user-42".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthenticatedPrincipal(pub String);

#[derive(Debug, Clone)]
struct LayerConfig {
    exempt_prefixes: BTreeSet<String>,
    message: String,
    per_principal: bool,
}

impl LayerConfig {
    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_prefixes.iter().any(|prefix| {
            path.starts_with(prefix.as_str())
                || (prefix.ends_with('/') && path == prefix.trim_end_matches('/'))
        })
    }
}

/// Tower layer enforcing one rate limit policy.
///
/// # Example
///
/// ```rust,no_run
/// use axum::{routing::post, Router};
/// use http_throttle::{RateLimitLayer, RateLimiterRegistry};
///
/// # fn app(registry: RateLimiterRegistry) -> Router {
/// let edge = registry.limiter("edge").unwrap();
/// let upload = registry.limiter("strict").unwrap();
///
/// Router::new()
///     .route(
///         "/api/upload",
///         post(|| async { "stored" })
///             .route_layer(RateLimitLayer::new(upload).with_message("Upload limit reached")),
///     )
///     .layer(RateLimitLayer::edge(edge))
/// # }
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
    config: Arc<LayerConfig>,
}

impl fmt::Debug for RateLimitLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("limiter", &self.limiter)
            .field("exempt_prefixes", &self.config.exempt_prefixes)
            .field("per_principal", &self.config.per_principal)
            .finish()
    }
}

impl RateLimitLayer {
    /// Limit every request, keyed by client IP.
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            limiter,
            config: Arc::new(LayerConfig {
                exempt_prefixes: BTreeSet::new(),
                message: DEFAULT_DENIAL_MESSAGE.to_string(),
                per_principal: false,
            }),
        }
    }

    /// Limit every request except those under [`EDGE_EXEMPT_PREFIXES`].
    pub fn edge(limiter: RateLimiter) -> Self {
        EDGE_EXEMPT_PREFIXES
            .iter()
            .fold(Self::new(limiter), |layer, prefix| layer.exempt_prefix(*prefix))
    }

    /// Let requests whose path starts with `prefix` pass without counting.
    ///
    /// A prefix ending in `/` also covers the bare path without it, so
    /// `/api/cron/` exempts `/api/cron` but not `/api/cronjobs`. Empty
    /// prefixes are ignored, since they would exempt everything.
    pub fn exempt_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            Arc::make_mut(&mut self.config).exempt_prefixes.insert(prefix);
        }
        self
    }

    /// Remove all exemptions, including the edge defaults.
    pub fn without_exemptions(mut self) -> Self {
        Arc::make_mut(&mut self.config).exempt_prefixes.clear();
        self
    }

    /// Set the `error` message of the 429 body.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).message = message.into();
        self
    }

    /// Key on the [`AuthenticatedPrincipal`] extension when present.
    ///
    /// Requests without the extension are keyed by client IP.
    pub fn per_principal(mut self) -> Self {
        Arc::make_mut(&mut self.config).per_principal = true;
        self
    }

    /// The limiter this layer applies.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Check if `path` bypasses this layer.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.config.is_exempt(path)
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

/// Service produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: RateLimiter,
    config: Arc<LayerConfig>,
}

impl<S: fmt::Debug> fmt::Debug for RateLimitService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitService")
            .field("inner", &self.inner)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for RateLimitService<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        if self.config.is_exempt(req.uri().path()) {
            return Box::pin(self.inner.call(req));
        }

        // Keep the service that was polled ready; leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = self.limiter.clone();
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            let principal = if config.per_principal {
                req.extensions()
                    .get::<AuthenticatedPrincipal>()
                    .map(|principal| principal.0.clone())
            } else {
                None
            };

            // Only the headers are borrowed across the await; bodies need not be Sync
            let check = limiter.check(req.headers(), principal.as_deref());
            let decision = check.await;

            if decision.is_denied() {
                tracing::debug!(
                    path = %req.uri().path(),
                    policy = %limiter.policy(),
                    "Request rejected by rate limit"
                );
                let retry_after = limiter.retry_after_secs(&decision);
                return Ok(too_many_requests(&decision, retry_after, &config.message));
            }

            let mut response = inner.call(req).await?;
            decorate(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::metrics::Metrics;
    use crate::domain::policy::Policy;
    use crate::infrastructure::memory_store::MemoryCounterStore;
    use crate::infrastructure::mocks::MockClock;
    use crate::infrastructure::response::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};
    use axum::body::Body;
    use http::StatusCode;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::{service_fn, ServiceExt};

    fn limiter(max: u64, clock: &MockClock) -> RateLimiter {
        let clock = Arc::new(clock.clone());
        RateLimiter::new(
            Policy::new(max, 60, "test").unwrap(),
            Arc::new(MemoryCounterStore::new(clock.clone())),
            clock,
            Metrics::new(),
        )
    }

    fn request(path: &str, ip: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_edge_exemptions() {
        let clock = MockClock::at_epoch_secs(0);
        let layer = RateLimitLayer::edge(limiter(1, &clock));

        assert!(layer.is_exempt("/api/cron/cleanup"));
        assert!(layer.is_exempt("/api/webhooks/stripe"));
        assert!(layer.is_exempt("/api/cron"));
        assert!(layer.is_exempt("/api/webhooks"));
        assert!(!layer.is_exempt("/api/cronjobs"));
        assert!(!layer.is_exempt("/api/webhooksx"));
        assert!(!layer.is_exempt("/api"));
        assert!(!layer.is_exempt("/"));

        let layer = layer.without_exemptions().exempt_prefix("/health").exempt_prefix("");
        assert!(layer.is_exempt("/health"));
        assert!(!layer.is_exempt("/api/cron/cleanup"));
    }

    #[tokio::test]
    async fn test_denied_request_never_reaches_inner_service() {
        let clock = MockClock::at_epoch_secs(1_000);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let inner = service_fn(move |_req: Request<Body>| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(Response::new(Body::empty())) }
        });
        let service = RateLimitLayer::new(limiter(1, &clock)).layer(inner);

        let first = service.clone().oneshot(request("/", "10.0.0.1")).await.unwrap();
        let second = service.clone().oneshot(request("/", "10.0.0.1")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[X_RATELIMIT_LIMIT], "1");
        assert_eq!(first.headers()[X_RATELIMIT_REMAINING], "0");
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exempt_path_is_not_counted_or_decorated() {
        let clock = MockClock::at_epoch_secs(1_000);
        let limiter = limiter(1, &clock);
        let inner = service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(Response::new(Body::empty()))
        });
        let service = RateLimitLayer::edge(limiter.clone()).layer(inner);

        for _ in 0..5 {
            let response = service
                .clone()
                .oneshot(request("/api/webhooks/github", "10.0.0.1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(X_RATELIMIT_LIMIT).is_none());
        }

        assert_eq!(limiter.metrics().snapshot().total_requests(), 0);
    }

    #[tokio::test]
    async fn test_per_principal_keys_on_extension() {
        let clock = MockClock::at_epoch_secs(1_000);
        let inner = service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(Response::new(Body::empty()))
        });
        let service = RateLimitLayer::new(limiter(1, &clock))
            .per_principal()
            .layer(inner);

        let as_user = |user: &str| {
            let mut req = request("/", "10.0.0.1");
            req.extensions_mut()
                .insert(AuthenticatedPrincipal(user.to_string()));
            req
        };

        let alice = service.clone().oneshot(as_user("alice")).await.unwrap();
        let bob = service.clone().oneshot(as_user("bob")).await.unwrap();
        let alice_again = service.clone().oneshot(as_user("alice")).await.unwrap();

        assert_eq!(alice.status(), StatusCode::OK);
        assert_eq!(bob.status(), StatusCode::OK);
        assert_eq!(alice_again.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
