//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::game::{CoordinatorError, MatchPhase};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::MatchSummary;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.client_origin.as_deref());

    Router::new()
        .route("/health", get(health_handler))
        .route("/match", get(match_handler))
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

/// Comma-separated origins; any origin when unset
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let Some(origins) = client_origin else {
        return CorsLayer::permissive();
    };

    let allowed_origins: Vec<header::HeaderValue> = origins
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    phase: Option<MatchPhase>,
    round: u32,
    combatants: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let summary = match state.coordinator() {
        Ok(handle) => handle.summary().await.ok(),
        Err(_) => None,
    };

    Json(HealthResponse {
        status: if summary.is_some() { "ok" } else { "idle" },
        uptime_secs: uptime_secs(),
        phase: summary.as_ref().map(|s| s.phase),
        round: summary.as_ref().map(|s| s.round).unwrap_or(0),
        combatants: summary.as_ref().map(|s| s.combatants.len()).unwrap_or(0),
    })
}

// ============================================================================
// Match endpoint
// ============================================================================

async fn match_handler(State(state): State<AppState>) -> Result<Json<MatchSummary>, AppError> {
    let summary = state.coordinator()?.summary().await?;
    Ok(Json(summary))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Match unavailable: {0}")]
    Unavailable(#[from] CoordinatorError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::Unavailable(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
