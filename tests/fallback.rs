//! Degradation tests: a limiter backed by a failing shared store must make
//! the same decisions as one backed by a healthy store.

use http::HeaderMap;
use http_throttle::infrastructure::mocks::{MockClock, SwitchableStore, UnreachableStore};
use http_throttle::{
    CircuitBreakerConfig, CircuitState, Clock, CounterStore, FallbackCounterStore,
    MemoryCounterStore, Metrics, Policy, RateLimiter,
};
use std::sync::Arc;
use std::time::Duration;

fn headers(ip: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", ip.parse().unwrap());
    headers
}

fn limiter(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, metrics: Metrics) -> RateLimiter {
    RateLimiter::new(Policy::new(3, 10, "api").unwrap(), store, clock, metrics)
}

#[tokio::test]
async fn test_fallback_decisions_match_healthy_store() {
    let clock = MockClock::at_epoch_secs(5_000);
    let clock_port: Arc<dyn Clock> = Arc::new(clock.clone());

    let healthy = limiter(
        Arc::new(MemoryCounterStore::new(clock_port.clone())),
        clock_port.clone(),
        Metrics::new(),
    );

    let fallback_metrics = Metrics::new();
    let degraded_store = FallbackCounterStore::new(
        Arc::new(UnreachableStore::new()),
        Arc::new(MemoryCounterStore::new(clock_port.clone())),
        fallback_metrics.clone(),
    );
    let degraded = limiter(Arc::new(degraded_store), clock_port, fallback_metrics.clone());

    // Two clients, interleaved, across several windows
    let clients = ["10.0.0.1", "10.0.0.2"];
    for step in 0..40u64 {
        let ip = clients[(step % 3 == 0) as usize];
        let expected = healthy.check(&headers(ip), None).await;
        let actual = degraded.check(&headers(ip), None).await;

        assert_eq!(actual, expected, "step {} for {}", step, ip);
        clock.advance(Duration::from_secs(1));
    }

    assert!(fallback_metrics.requests_denied() > 0);
    assert_eq!(fallback_metrics.backend_fallbacks(), 40);
    assert_eq!(fallback_metrics.fail_open(), 0);
}

#[tokio::test]
async fn test_backend_recovers_after_timeout() {
    let clock = MockClock::at_epoch_secs(0);
    let clock_port: Arc<dyn Clock> = Arc::new(clock.clone());
    let primary = Arc::new(UnreachableStore::new());
    let store = FallbackCounterStore::with_circuit_breaker(
        primary.clone(),
        Arc::new(MemoryCounterStore::new(clock_port)),
        Metrics::new(),
        CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
        },
    );

    store.increment("k", Duration::from_secs(60)).await.unwrap();
    assert_eq!(store.circuit_state(), CircuitState::Open);

    store.increment("k", Duration::from_secs(60)).await.unwrap();
    assert_eq!(primary.calls(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;

    // One trial call reaches the backend again, fails, and reopens the circuit
    let count = store.increment("k", Duration::from_secs(60)).await.unwrap();
    assert_eq!(count.count, 3);
    assert_eq!(primary.calls(), 2);
    assert_eq!(store.circuit_state(), CircuitState::Open);
}

#[tokio::test]
async fn test_backend_down_at_startup_is_used_once_it_comes_up() {
    let clock = MockClock::at_epoch_secs(0);
    let clock_port: Arc<dyn Clock> = Arc::new(clock.clone());
    let primary = Arc::new(SwitchableStore::new(clock_port.clone(), false));
    let local = Arc::new(MemoryCounterStore::new(clock_port));
    let store = FallbackCounterStore::with_circuit_breaker(
        primary.clone(),
        local.clone(),
        Metrics::new(),
        CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
        },
    );
    let window = Duration::from_secs(60);

    store.increment("api:10.0.0.1", window).await.unwrap();
    assert_eq!(store.circuit_state(), CircuitState::Open);
    assert_eq!(local.count("api:10.0.0.1"), Some(1));

    primary.set_available(true);
    tokio::time::sleep(Duration::from_millis(80)).await;

    let count = store.increment("api:10.0.0.1", window).await.unwrap();
    assert_eq!(count.count, 1);
    assert_eq!(store.circuit_state(), CircuitState::Closed);
    assert_eq!(primary.count("api:10.0.0.1"), Some(1));

    store.increment("api:10.0.0.1", window).await.unwrap();
    assert_eq!(primary.count("api:10.0.0.1"), Some(2));
    assert_eq!(local.count("api:10.0.0.1"), Some(1));
    assert_eq!(primary.calls(), 3);
}
