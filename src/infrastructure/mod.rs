//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Counter stores (in-memory DashMap, Redis)
//! - HTTP integration (tower Layer, 429 responses)
//! - Settings loading and backend selection

pub mod clock;
pub mod layer;
pub mod memory_store;
pub mod response;
pub mod settings;

#[cfg(feature = "redis-store")]
pub mod redis_store;

/// Mock implementations for testing.
///
/// This module is only available when the `test-helpers` feature is enabled,
/// or during test builds.
///
/// To use these mocks in integration tests, add to your `Cargo.toml`:
/// ```toml
/// [dev-dependencies]
/// http-throttle = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
