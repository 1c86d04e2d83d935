pub mod network;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use podwatch_monitor::Poller;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::types::HealthResponse;

pub struct AppState {
    pub poller: Arc<Poller>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Network views
        .route("/api/network/stats", get(network::network_stats))
        .route("/api/network/pods", get(network::list_pods))
        .route("/api/network/pods/:address/version", get(network::probe_version))
        .route("/api/network/events", get(network::list_events))
        .route("/api/network/refresh", post(network::refresh))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health - Health check endpoint
async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}
