//! Forwarding admitted requests to their upstream.
//!
//! # Responsibilities
//! - Rewrite the request URI to the route's upstream address
//! - Send it over a pooled HTTP/1.1 client
//! - Answer the gateway's own health endpoints when no upstream owns the path

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::uri::{Authority, Scheme};
use axum::http::{Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::UpstreamError;
use crate::routing::Route;

/// Pooled upstream client plus the gateway's built-in health endpoints.
#[derive(Clone)]
pub struct UpstreamForwarder {
    client: Client<HttpConnector, Body>,
    health: Arc<HashSet<String>>,
}

impl std::fmt::Debug for UpstreamForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamForwarder").finish_non_exhaustive()
    }
}

impl UpstreamForwarder {
    /// Exact entries of `bypass_paths` become local health endpoints.
    /// Wildcard entries only skip admission control.
    pub fn new<S: AsRef<str>>(bypass_paths: &[S]) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let health: HashSet<String> = bypass_paths
            .iter()
            .map(|p| AsRef::<str>::as_ref(p))
            .filter(|p| !p.ends_with('*'))
            .map(str::to_string)
            .collect();
        Self {
            client,
            health: Arc::new(health),
        }
    }

    /// Forward `request` to `route`, or answer it locally when unrouted.
    pub async fn forward(
        &self,
        request: Request<Body>,
        route: Option<Arc<Route>>,
    ) -> Result<Response, UpstreamError> {
        let Some(route) = route else {
            let path = request.uri().path();
            if self.health.contains(path) {
                return Ok(health_response());
            }
            return Err(UpstreamError::NoRoute(path.to_string()));
        };

        let (mut parts, body) = request.into_parts();
        parts.uri = upstream_uri(&parts.uri, &route)?;

        tracing::debug!(group = %route.group, uri = %parts.uri, "Forwarding to upstream");
        let response: hyper::Response<Incoming> = self
            .client
            .request(Request::from_parts(parts, body))
            .await?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

fn upstream_uri(original: &Uri, route: &Route) -> Result<Uri, UpstreamError> {
    let mut parts = original.clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Authority::from_str(&route.upstream.to_string()).ok();
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(axum::http::uri::PathAndQuery::from_static("/"));
    }
    Uri::from_parts(parts).map_err(|e| UpstreamError::Request(e.into()))
}

fn health_response() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") })),
    )
        .into_response()
}
