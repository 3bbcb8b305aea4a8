//! Admission gateway
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────┐
//!                   │                ADMISSION GATEWAY                  │
//!                   │                                                   │
//!   Client Request  │  ┌────────┐   ┌────────────┐   ┌──────────────┐  │
//!   ────────────────┼─▶│  http  │──▶│ classifier │──▶│   circuit    │  │
//!                   │  │ server │   │ key, group │   │   breaker    │  │
//!                   │  └────────┘   └────────────┘   └──────┬───────┘  │
//!                   │                                       ▼          │
//!                   │                                ┌──────────────┐  │
//!                   │                                │ rate limiter │  │
//!                   │                                └──────┬───────┘  │
//!                   │                                       ▼          │
//!   Client Response │  ┌──────────┐                  ┌──────────────┐  │
//!   ◀───────────────┼──│ response │◀─────────────────│   upstream   │◀─┼── Upstream
//!                   │  │ headers  │                  │    client    │  │   Service
//!                   │  └──────────┘                  └──────────────┘  │
//!                   └──────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use admission_gateway::admin::{setup_admin_router, AdminState};
use admission_gateway::config::{load_config, GatewayConfig};
use admission_gateway::error::Result;
use admission_gateway::lifecycle::{spawn_signal_listener, Shutdown};
use admission_gateway::observability::{logging, metrics};
use admission_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "admission-gateway", version)]
#[command(about = "Admission-control gateway: rate limiting and circuit breaking in front of upstreams")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "admission-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        groups = config.upstreams.len(),
        rate_limit_enabled = config.rate_limit.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let server = HttpServer::new(config.clone());
    let admin = if config.admin.enabled {
        let state = AdminState::new(server.pipeline().clone(), &config.admin.api_key);
        Some(tokio::spawn(serve_admin(
            config.admin.bind_address.clone(),
            state,
            shutdown.subscribe(),
        )))
    } else {
        None
    };

    server.run(listener, shutdown.subscribe()).await?;

    if let Some(admin) = admin {
        match admin.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn serve_admin(
    bind_address: String,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    let app = setup_admin_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

