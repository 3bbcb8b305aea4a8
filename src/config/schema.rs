//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the admission gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream groups, each reached through one path prefix.
    pub upstreams: Vec<UpstreamConfig>,

    /// Path patterns exempt from admission control (health checks).
    /// A trailing `*` matches by prefix, anything else matches exactly.
    pub bypass_paths: Vec<String>,

    /// Request signals used to derive the client identity.
    pub identity: IdentityConfig,

    /// Rate limiting policy.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker policy.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            upstreams: Vec::new(),
            bypass_paths: vec!["/health".to_string(), "/ready".to_string()],
            identity: IdentityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// An endpoint group and the upstream serving it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Endpoint group name, the unit of circuit isolation.
    pub group: String,

    /// Path prefix routed to this group.
    pub path_prefix: String,

    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,
}

/// Header names consulted by the request classifier.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub api_key_header: String,
    pub forwarded_header: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            api_key_header: "x-api-key".to_string(),
            forwarded_header: "x-forwarded-for".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting. When false no limiter state is ever created.
    pub enabled: bool,

    /// Sustained requests per minute for anonymous (address) keys.
    pub requests_per_minute: u32,

    /// Sustained requests per hour.
    pub requests_per_hour: u32,

    /// Requests per minute for API-key and authenticated-user keys.
    pub per_user_requests_per_minute: u32,

    /// Requests allowed within one burst window before lockout.
    pub burst_limit: u32,

    /// Burst window length in seconds.
    pub burst_window_secs: u64,

    /// Lockout applied after a burst violation, in minutes.
    pub lockout_duration_minutes: u64,

    /// Per endpoint group limits replacing the global ones.
    pub endpoint_overrides: Vec<EndpointOverride>,

    /// Keys idle for this long are evicted. Must cover the hour window.
    pub idle_key_ttl_secs: u64,

    /// How often the eviction task runs.
    pub eviction_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            requests_per_hour: 1000,
            per_user_requests_per_minute: 120,
            burst_limit: 100,
            burst_window_secs: 60,
            lockout_duration_minutes: 15,
            endpoint_overrides: Vec::new(),
            idle_key_ttl_secs: 7200,
            eviction_interval_secs: 60,
        }
    }
}

/// Limits for one endpoint group, matched by the group's path prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointOverride {
    pub group_prefix: String,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a group's circuit.
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a trial request.
    pub cool_down_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down_secs: 30,
        }
    }
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Placeholder admin key; validation refuses it when the admin API is on.
pub const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_ADMIN_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
