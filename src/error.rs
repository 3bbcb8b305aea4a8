//! Error types for the gateway.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error for starting and running the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Invalid or unreadable configuration; fatal at startup.
    #[error("Configuration invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A failed call to an upstream. Always a circuit breaker failure signal.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("could not build upstream request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("no upstream configured for {0}")]
    NoRoute(String),
}

/// Result type alias for gateway startup operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
