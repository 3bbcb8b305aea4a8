//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → routing::classifier (RequestKey, EndpointGroup)
//!     → bypass? forward immediately
//!     → resilience::circuit_breaker (open → 503, quota untouched)
//!     → security::rate_limit (denied → 429, no upstream call)
//!     → upstream call under deadline
//!     → record outcome (5xx, timeout, transport error, cancellation = failure)
//!     → http::response (quota headers)
//! ```
//!
//! # Design Decisions
//! - Circuit check first so an open circuit does not burn client quota
//! - Engine faults fail open and are logged
//! - The upstream call is a closure, so the pipeline knows nothing of HTTP clients

pub mod pipeline;

pub use pipeline::{is_upstream_failure, AdmissionPipeline};
