//! Team Arena Server - Authoritative two-team elimination match server
//!
//! This is the main entry point. It handles:
//! - WebSocket connections for live match play
//! - HTTP endpoints for health and match status
//! - The single match coordinator that owns all round and score state

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use team_arena_server::app::AppState;
use team_arena_server::config::Config;
use team_arena_server::http::build_router;
use team_arena_server::util::time::init_server_time;

/// Time for connections to flush the lobby handoff before the listener closes
const LOBBY_HANDOFF_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Team Arena Server");
    info!("Server address: {}", config.server_addr);
    info!(
        target_round_wins = config.match_settings.target_round_wins,
        max_health = config.match_settings.max_health,
        hit_policy = ?config.match_settings.hit_policy,
        "Match settings"
    );

    // Create application state
    let state = AppState::new(config.clone());
    let _feed = state.install_scoreboard_feed();
    let coordinator = state.start_coordinator()?;

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(coordinator))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Resolves on Ctrl+C, SIGTERM, or once the match has sent everyone to the lobby
async fn shutdown_signal(coordinator: JoinHandle<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
        result = coordinator => {
            if let Err(e) = result {
                error!(error = %e, "Match coordinator task failed");
            }
            tokio::time::sleep(LOBBY_HANDOFF_GRACE).await;
            info!("Match finished, starting graceful shutdown");
        }
    }
}
