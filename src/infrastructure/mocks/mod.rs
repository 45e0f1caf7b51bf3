//! Mock implementations for testing.
//!
//! Test doubles for the clock and counter store ports, enabling controlled
//! testing of limiter and fallback logic.

pub mod clock;
pub mod store;

pub use clock::MockClock;
pub use store::{SwitchableStore, UnreachableStore};
