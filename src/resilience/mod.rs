//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → circuit_breaker.rs (fail fast if the group's circuit is open)
//!     → timeouts.rs (enforce request deadline)
//!     → circuit_breaker.rs (record outcome, open circuit at threshold)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - No retries: a failing upstream gets less traffic, not more
//! - Circuit breaker prevents cascading failures

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{
    CircuitBreaker, CircuitOpen, CircuitPermit, CircuitPolicy, CircuitSnapshot, CircuitState,
};
