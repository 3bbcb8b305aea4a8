//! Read-only admin API, served on its own listener.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use crate::admission::AdmissionPipeline;
use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone, Debug)]
pub struct AdminState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub api_key: Arc<str>,
    pub started: Instant,
}

impl AdminState {
    pub fn new(pipeline: Arc<AdmissionPipeline>, api_key: &str) -> Self {
        Self {
            pipeline,
            api_key: Arc::from(api_key),
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/limits", get(get_limits))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
