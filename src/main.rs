use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::info;

mod api;
mod auth;
mod config;
mod controller;
mod engine;
mod error;
mod estimator;
mod prober;
mod proxy;
mod reaper;
mod selector;
mod state;
mod traffic;

pub use config::Config;
pub use error::AppError;
pub use state::RouterState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gpu_fleet_router=info,tower_http=warn".into()),
        )
        .init();

    let registry_path = std::env::var("GFR_REGISTRY")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/gpu-fleet-router/registry.toml"));

    let config = Config::load(&registry_path)
        .with_context(|| format!("failed to load registry from {}", registry_path.display()))?;

    info!(
        client_port = config.policy.client_port,
        admin_port = config.policy.admin_port,
        backends = config.registry.backends.len(),
        "gpu-fleet-router starting"
    );

    let config = Arc::new(config);
    let docker = engine::DockerEngine::connect().context("connecting to container engine")?;
    let state = Arc::new(RouterState::new(config.clone(), Arc::new(docker)));

    tokio::spawn(reaper::run(Arc::clone(&state)));

    let client_addr: SocketAddr = format!("0.0.0.0:{}", config.policy.client_port).parse()?;
    let admin_addr: SocketAddr = format!("0.0.0.0:{}", config.policy.admin_port).parse()?;

    info!(%client_addr, "client API listening");
    info!(%admin_addr, "admin API listening");

    let client_listener = tokio::net::TcpListener::bind(client_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;

    let trace_layer = || {
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO))
    };

    // Bearer-token auth is applied inside `api::client::router`/`api::admin::router`,
    // scoped to the routes that need it, so `/healthz` and `/admin/healthz` stay
    // reachable without a token. Only request-id tagging and tracing apply here,
    // to every route on both listeners alike.
    let client_app = api::client::router(Arc::clone(&state))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer());

    let admin_app = api::admin::router(Arc::clone(&state))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer());

    tokio::select! {
        result = axum::serve(client_listener, client_app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result.context("client API server error")?;
        }
        result = axum::serve(admin_listener, admin_app) => {
            result.context("admin API server error")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
