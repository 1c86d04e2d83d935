use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use podwatch_monitor::services::poller::{
    EventsResponse, FailureResponse, PodsResponse, StatsResponse,
};
use podwatch_monitor::services::CycleOutcome;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::{
    api::AppState,
    types::{EventsQuery, RefreshResponse, VersionResponse},
};

type Failure = (StatusCode, Json<FailureResponse>);

fn unavailable(failure: FailureResponse) -> Failure {
    (StatusCode::SERVICE_UNAVAILABLE, Json(failure))
}

/// GET /api/network/stats - Network overview from the latest cycle
pub async fn network_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, Failure> {
    state
        .poller
        .network_stats()
        .await
        .map(Json)
        .map_err(unavailable)
}

/// GET /api/network/pods - Roster with stats, online flag and health score per pod
pub async fn list_pods(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PodsResponse>, Failure> {
    state.poller.pods().await.map(Json).map_err(unavailable)
}

/// GET /api/network/events - Recent change events, newest first
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    Json(state.poller.events(query.limit).await)
}

/// POST /api/network/refresh - Run a poll cycle now
pub async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, Failure> {
    let started = Instant::now();
    info!("Manual refresh requested");

    match state.poller.run_cycle().await {
        Ok(CycleOutcome::Completed(report)) => Ok(Json(RefreshResponse {
            status: "completed".to_string(),
            events: report.events.len(),
        })),
        Ok(CycleOutcome::Skipped) => Ok(Json(RefreshResponse {
            status: "skipped".to_string(),
            events: 0,
        })),
        Err(e) => Err(unavailable(FailureResponse::from_error(&e, started))),
    }
}

/// GET /api/network/pods/:address/version - Ask a pod for its version directly
pub async fn probe_version(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<VersionResponse>, (StatusCode, String)> {
    match state.poller.probe_version(&address).await {
        None => Err((
            StatusCode::NOT_FOUND,
            format!("Pod not in current roster: {}", address),
        )),
        Some(Err(e)) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
        Some(Ok(version)) => Ok(Json(VersionResponse { address, version })),
    }
}
