//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages runtime behavior:
//! - Rate limiter (decision making)
//! - Limiter registry (named policies over a shared store)
//! - Fallback store and its circuit breaker (backend degradation)
//! - Sweeper (periodic cleanup of expired windows)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod circuit_breaker;
pub mod fallback;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod sweeper;
