//! Response decoration and admission denials.
//!
//! # Responsibilities
//! - Add quota headers to every response that reached an upstream
//! - Build 429 / 503 denial responses with `Retry-After` and a JSON body
//! - Map upstream errors to 502 / 504
//!
//! # Design Decisions
//! - `X-RateLimit-Reset` is seconds until the reported scope's window resets
//! - Hint values are rounded up to whole seconds and never zero
//! - Upstream responses otherwise pass through untouched

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::clock::ceil_secs;
use crate::error::UpstreamError;
use crate::resilience::CircuitOpen;
use crate::security::{Decision, Quota};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// JSON body of a refused request.
#[derive(Debug, Serialize)]
pub struct DenialBody<'a> {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<&'a str>,
    pub retry_after_secs: u64,
}

pub fn apply_quota_headers(headers: &mut HeaderMap, quota: &Quota) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(ceil_secs(quota.reset_after)));
}

/// 429 for a refused rate limit decision.
pub fn rate_limited(decision: &Decision) -> Response {
    let retry_after = ceil_secs(decision.retry_after.unwrap_or_default());
    let body = DenialBody {
        error: "rate_limited",
        scope: decision.quota.map(|q| q.scope.as_str()),
        group: None,
        retry_after_secs: retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    if let Some(quota) = &decision.quota {
        apply_quota_headers(headers, quota);
    }
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// 503 for a group whose circuit is open.
pub fn circuit_open(open: &CircuitOpen) -> Response {
    let retry_after = ceil_secs(open.retry_after);
    let body = DenialBody {
        error: "circuit_open",
        scope: None,
        group: Some(&*open.group),
        retry_after_secs: retry_after,
    };

    let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Gateway-generated response for an upstream call that produced no response.
pub fn upstream_error(err: &UpstreamError) -> Response {
    let status = match err {
        UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        UpstreamError::NoRoute(_) => StatusCode::NOT_FOUND,
        UpstreamError::Transport(_) | UpstreamError::Request(_) => StatusCode::BAD_GATEWAY,
    };
    (status, err.to_string()).into_response()
}
