//! Resilience primitives protecting the gateway from backend failure.

pub mod circuit_breaker;

pub use circuit_breaker::{Admission, BreakerRegistry, BreakerState};
