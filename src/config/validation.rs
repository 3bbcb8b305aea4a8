//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (overrides reference existing groups)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - A zero limit is an error, never a way to switch enforcement off

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, PLACEHOLDER_ADMIN_KEY};

/// Longest window the limiter keeps; idle eviction must not undercut it.
const HOUR_SECS: u64 = 3600;

/// Upper bound for burst windows and circuit cool-downs.
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Upper bound for the burst lockout (one week).
pub const MAX_LOCKOUT_MINUTES: u64 = 7 * 24 * 60;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: String },

    #[error("{field} must be at most {max} (got {value})")]
    TooLarge { field: String, max: u64, value: u64 },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: String, value: String },

    #[error("{field} must start with '/': {value}")]
    InvalidPrefix { field: String, value: String },

    #[error("duplicate upstream group '{0}'")]
    DuplicateGroup(String),

    #[error("path prefix '{0}' is routed to more than one group")]
    DuplicatePrefix(String),

    #[error("endpoint override references unknown group prefix '{0}'")]
    UnknownOverridePrefix(String),

    #[error("rate_limit.idle_key_ttl_secs must be at least {HOUR_SECS} (got {0})")]
    EvictionTooAggressive(u64),

    #[error("admin.api_key must be changed from the placeholder when the admin API is enabled")]
    PlaceholderAdminKey,
}

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::NotPositive {
            field: field.to_string(),
        });
    }
}

fn at_most(errors: &mut Vec<ValidationError>, field: &str, value: u64, max: u64) {
    if value > max {
        errors.push(ValidationError::TooLarge {
            field: field.to_string(),
            max,
            value,
        });
    }
}

fn address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    address(&mut errors, "listener.bind_address", &config.listener.bind_address);

    let mut groups = HashSet::new();
    let mut prefixes = HashSet::new();
    for (i, upstream) in config.upstreams.iter().enumerate() {
        if !groups.insert(upstream.group.as_str()) {
            errors.push(ValidationError::DuplicateGroup(upstream.group.clone()));
        }
        if !upstream.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                field: format!("upstreams[{i}].path_prefix"),
                value: upstream.path_prefix.clone(),
            });
        } else if !prefixes.insert(upstream.path_prefix.as_str()) {
            errors.push(ValidationError::DuplicatePrefix(upstream.path_prefix.clone()));
        }
        address(&mut errors, &format!("upstreams[{i}].address"), &upstream.address);
    }

    for (i, pattern) in config.bypass_paths.iter().enumerate() {
        if !pattern.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                field: format!("bypass_paths[{i}]"),
                value: pattern.clone(),
            });
        }
    }

    let rl = &config.rate_limit;
    positive(&mut errors, "rate_limit.requests_per_minute", rl.requests_per_minute.into());
    positive(&mut errors, "rate_limit.requests_per_hour", rl.requests_per_hour.into());
    positive(
        &mut errors,
        "rate_limit.per_user_requests_per_minute",
        rl.per_user_requests_per_minute.into(),
    );
    positive(&mut errors, "rate_limit.burst_limit", rl.burst_limit.into());
    positive(&mut errors, "rate_limit.burst_window_secs", rl.burst_window_secs);
    positive(&mut errors, "rate_limit.lockout_duration_minutes", rl.lockout_duration_minutes);
    positive(&mut errors, "rate_limit.eviction_interval_secs", rl.eviction_interval_secs);
    at_most(&mut errors, "rate_limit.burst_window_secs", rl.burst_window_secs, MAX_WINDOW_SECS);
    at_most(
        &mut errors,
        "rate_limit.lockout_duration_minutes",
        rl.lockout_duration_minutes,
        MAX_LOCKOUT_MINUTES,
    );
    if rl.idle_key_ttl_secs < HOUR_SECS {
        errors.push(ValidationError::EvictionTooAggressive(rl.idle_key_ttl_secs));
    }

    for (i, ov) in rl.endpoint_overrides.iter().enumerate() {
        if !prefixes.contains(ov.group_prefix.as_str()) {
            errors.push(ValidationError::UnknownOverridePrefix(ov.group_prefix.clone()));
        }
        positive(
            &mut errors,
            &format!("rate_limit.endpoint_overrides[{i}].requests_per_minute"),
            ov.requests_per_minute.into(),
        );
        positive(
            &mut errors,
            &format!("rate_limit.endpoint_overrides[{i}].requests_per_hour"),
            ov.requests_per_hour.into(),
        );
    }

    positive(
        &mut errors,
        "circuit_breaker.failure_threshold",
        config.circuit_breaker.failure_threshold.into(),
    );
    positive(&mut errors, "circuit_breaker.cool_down_secs", config.circuit_breaker.cool_down_secs);
    at_most(
        &mut errors,
        "circuit_breaker.cool_down_secs",
        config.circuit_breaker.cool_down_secs,
        MAX_WINDOW_SECS,
    );
    positive(&mut errors, "timeouts.request_secs", config.timeouts.request_secs);

    if config.observability.metrics_enabled {
        address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key == PLACEHOLDER_ADMIN_KEY || config.admin.api_key.is_empty() {
            errors.push(ValidationError::PlaceholderAdminKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
