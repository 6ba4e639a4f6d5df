//! Wires together config loading, child supervision, and the HTTP surface
//! into the `mcp-router-server` binary's entry point.

pub mod cli;
pub mod config_loader;
pub mod error_code;
pub mod http;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use mcp_router_core::Supervisor;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli::RouterCli;
use crate::http::AppState;
use crate::session::SessionManager;

pub async fn run_main(cli: RouterCli) -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config_loader::load_config(&cli.config, &cli.config_overrides)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    let (supervisor, startup_errors) = Supervisor::start(config).await;
    for (alias, error) in &startup_errors {
        warn!(alias, error = %error, "child failed to start; continuing without it");
    }

    let state = AppState {
        supervisor: supervisor.clone(),
        sessions: Arc::new(SessionManager::new()),
    };
    let router = http::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("mcp-router-server listening on http://{addr}/mcp");

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    server.await.context("server loop failed")?;

    supervisor.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            std::future::pending::<()>().await;
            return;
        };
        signal.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
