// =============================================================================
// Signal Relay — Main Entry Point
// =============================================================================
//
// Producers (MT5 expert advisors) POST signal events to `/`; viewers connect
// to `/ws` and receive the full signal set on every change. A background
// sweeper evicts signals whose producer stopped refreshing them.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod fanout;
mod registry;
mod runtime_config;
mod sweeper;
mod types;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║            Signal Relay — Starting Up                    ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    info!(
        bind_addr = %config.bind_addr,
        signal_timeout_ms = config.signal_timeout_ms,
        sweep_interval_ms = config.sweep_interval_ms,
        "relay configured"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));

    // ── 3. Expiry sweeper ────────────────────────────────────────────────
    let sweep_state = state.clone();
    tokio::spawn(async move {
        sweeper::run_sweeper(sweep_state).await;
    });

    // ── 4. HTTP / WebSocket server ───────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = state.runtime_config.read().bind_addr.clone();
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("Failed to bind server");
        info!(addr = %bind_addr_clone, "server listening");
        axum::serve(listener, app).await.expect("server failed");
    });

    info!("Relay running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    // Close every viewer channel so peers get a proper close handshake
    // before the process exits.
    state.fanout.close_all();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    info!("Signal Relay shut down complete.");
    Ok(())
}
