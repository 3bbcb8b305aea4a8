use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::resilience::CircuitSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub groups: Vec<String>,
}

#[derive(Serialize)]
pub struct OverrideSummary {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

#[derive(Serialize)]
pub struct LimiterSummary {
    pub enabled: bool,
    pub tracked_keys: usize,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub per_user_requests_per_minute: u32,
    pub burst_limit: u32,
    pub burst_window_secs: u64,
    pub lockout_secs: u64,
    pub overrides: BTreeMap<String, OverrideSummary>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        groups: state
            .pipeline
            .router()
            .groups()
            .map(|g| g.to_string())
            .collect(),
    })
}

pub async fn get_circuits(State(state): State<AdminState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.pipeline.breaker().snapshot())
}

pub async fn get_limits(State(state): State<AdminState>) -> Json<LimiterSummary> {
    let limiter = state.pipeline.limiter();
    let policy = limiter.policy();

    Json(LimiterSummary {
        enabled: policy.enabled,
        tracked_keys: limiter.tracked_keys(),
        requests_per_minute: policy.requests_per_minute,
        requests_per_hour: policy.requests_per_hour,
        per_user_requests_per_minute: policy.per_user_requests_per_minute,
        burst_limit: policy.burst_limit,
        burst_window_secs: policy.burst_window.as_secs(),
        lockout_secs: policy.lockout.as_secs(),
        overrides: policy
            .overrides
            .iter()
            .map(|(group, limits)| {
                (
                    group.to_string(),
                    OverrideSummary {
                        requests_per_minute: limits.per_minute,
                        requests_per_hour: limits.per_hour,
                    },
                )
            })
            .collect(),
    })
}
