//! Admission-control gateway library.
//!
//! Request classification, per-group circuit breaking and multi-scope rate
//! limiting in front of proxied upstream services.

pub mod admin;
pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use admission::AdmissionPipeline;
pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
