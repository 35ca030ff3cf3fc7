use std::sync::Arc;

use anyhow::Context;
use llamagate::AppState;
use tracing::Level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let gateway_config = llamagate::config::GatewayConfig::from_env().context("invalid gateway configuration")?;
    let mcp_config = llamagate::config::load_config().await.context("failed to load MCP server configuration")?;

    if gateway_config.auth_disabled() {
        tracing::warn!("API_KEY is unset, authentication is disabled for every non-public route");
    }

    let port = gateway_config.port;
    let state = Arc::new(AppState::new(gateway_config, mcp_config).context("failed to build application state")?);
    state.start().await.context("failed to start MCP server manager")?;

    let app = llamagate::router::build_router((*state).clone());

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "llamagate listening");

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    shutdown_state.shutdown().await.context("failed to shut down cleanly")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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
    tracing::info!("shutdown signal received");
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_max_level(Level::TRACE).try_init();
}
