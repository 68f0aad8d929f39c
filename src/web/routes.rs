use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::files::{download_recording, download_snapshot};
use super::ws::ws_handler;
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.mediamtx.health().await { "ok" } else { "degraded" };
    Json(HealthResponse { status, version: env!("CARGO_PKG_VERSION") })
}

/// Builds the application router: the WebSocket RPC endpoint at the configured
/// `ws_path`, the plain file surface, and a liveness probe for orchestrators.
pub fn create_router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.get().server.ws_path.clone();
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/files/recordings/:filename", get(download_recording))
        .route("/files/snapshots/:filename", get(download_snapshot))
        .route("/healthz", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
