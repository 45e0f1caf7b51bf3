//! Domain layer - pure rate limiting logic with no I/O.
//!
//! - Policies and the decisions they produce
//! - Fixed-window counters
//! - Request key derivation from headers
//!
//! All types in this layer are pure and easily testable.

pub mod key;
pub mod policy;
pub mod window;
