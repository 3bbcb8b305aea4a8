//! Routing and request classification subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path, headers, peer address, extensions)
//!     → classifier.rs (derive RequestKey)
//!     → matcher.rs (bypass patterns)
//!     → router.rs (longest-prefix group lookup)
//!     → Return: (RequestKey, EndpointGroup, Route?)
//!
//! Route Compilation (at startup):
//!     UpstreamConfig[]
//!     → Sort by prefix length
//!     → Freeze as immutable GroupRouter
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always classifies the same way
//! - Classification never fails; it degrades to coarser identities

pub mod classifier;
pub mod matcher;
pub mod router;

pub use classifier::{
    AuthenticatedUser, Classification, EndpointGroup, KeyTier, RequestClassifier, RequestKey,
};
pub use router::{GroupRouter, Route};
