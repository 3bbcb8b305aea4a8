//! Security subsystem: client quotas.
//!
//! # Data Flow
//! ```text
//! Admitted request (circuit closed):
//!     → rate_limit.rs (resolve limits for key tier and endpoint group)
//!     → rate_store.rs (atomic per-key evaluation)
//!     → rate_window.rs (lazy fixed windows)
//! ```
//!
//! # Design Decisions
//! - Quota is consumed at admission and never refunded
//! - Refused requests count toward burst detection only
//! - Store faults surface as `RateLimitError`; the pipeline admits uncounted

pub mod rate_limit;
pub mod rate_store;
pub mod rate_window;

pub use rate_limit::{Decision, Quota, RateLimitError, RateLimitPolicy, RateLimiter};
pub use rate_store::{EndpointLimits, LocalStore, RateLimitStore, ResolvedLimits};
pub use rate_window::{RateWindow, Scope};
