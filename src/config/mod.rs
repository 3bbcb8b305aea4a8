//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → compiled into engine policies at startup
//! ```
//!
//! # Design Decisions
//! - Config is loaded once; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, EndpointOverride, GatewayConfig, IdentityConfig,
    ListenerConfig, ObservabilityConfig, RateLimitConfig, TimeoutConfig, UpstreamConfig,
};
pub use validation::ValidationError;
