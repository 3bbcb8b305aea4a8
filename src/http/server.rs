//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all gateway handler
//! - Wire up middleware (request id, tracing)
//! - Run every request through the admission pipeline
//! - Spawn the rate limiter's idle key eviction
//! - Serve until the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::admission::AdmissionPipeline;
use crate::clock::{MonotonicClock, SharedClock};
use crate::config::GatewayConfig;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::upstream::UpstreamForwarder;

/// Application state injected into handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub upstream: UpstreamForwarder,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    pipeline: Arc<AdmissionPipeline>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    /// Create a server whose engines read time from `clock`.
    pub fn with_clock(config: GatewayConfig, clock: SharedClock) -> Self {
        let pipeline = Arc::new(AdmissionPipeline::from_config(&config, clock));
        let state = AppState {
            pipeline: pipeline.clone(),
            upstream: UpstreamForwarder::new(&config.bypass_paths),
        };

        let router = Self::build_router(state);
        Self {
            router,
            config,
            pipeline,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let trace = TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                path = %req.uri().path(),
                request_id = %request_id(req),
            )
        });

        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(trace)
                    .layer(propagate_request_id_layer()),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            groups = self.config.upstreams.len(),
            "HTTP server starting"
        );

        let limiter = self.pipeline.limiter().clone();
        let interval = Duration::from_secs(self.config.rate_limit.eviction_interval_secs);
        tokio::spawn(limiter.run_eviction(interval, shutdown.resubscribe()));

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<AdmissionPipeline> {
        &self.pipeline
    }
}

/// Catch-all handler: admission control in front of the upstream call.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    tracing::debug!(
        method = %request.method(),
        path = %request.uri().path(),
        peer = %peer,
        "Admitting request"
    );

    let upstream = state.upstream.clone();
    state
        .pipeline
        .handle(request, Some(peer), move |req, route| async move {
            upstream.forward(req, route).await
        })
        .await
}
