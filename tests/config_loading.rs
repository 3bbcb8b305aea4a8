//! The shipped example configuration must load and validate.

use admission_gateway::config::{parse_config, ConfigError, ValidationError};

const EXAMPLE: &str = include_str!("../gateway.example.toml");

#[test]
fn test_example_config_is_valid() {
    let config = parse_config(EXAMPLE).unwrap();

    assert_eq!(config.upstreams.len(), 2);
    assert_eq!(config.rate_limit.requests_per_minute, 60);
    assert_eq!(config.rate_limit.endpoint_overrides[0].group_prefix, "/api/orders");
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert!(!config.admin.enabled);
}

#[test]
fn test_zero_limit_prevents_start() {
    let broken = EXAMPLE.replace("requests_per_minute = 60", "requests_per_minute = 0");
    match parse_config(&broken) {
        Err(ConfigError::Validation(errors)) => assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::NotPositive { .. }))),
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn test_unbounded_lockout_prevents_start() {
    let result = parse_config(
        "[rate_limit]\nburst_limit = 2\nlockout_duration_minutes = 300000000000000000\n",
    );
    match result {
        Err(ConfigError::Validation(errors)) => assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::TooLarge { field, .. } if field == "rate_limit.lockout_duration_minutes"
        ))),
        other => panic!("expected validation failure, got {other:?}"),
    }
}
