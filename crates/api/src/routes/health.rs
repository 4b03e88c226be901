use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use testrig_queue::HealthState;

use crate::error::ApiResult;
use crate::state::AppState;

/// Create health router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/version", get(version_info))
}

/// Aggregate queue/worker health. Unhealthy reports 503 so load balancers
/// stop routing here; degraded still serves traffic.
pub async fn health_check(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let health = state.queue.health_status().await.map_err(|e| {
        testrig_models::EngineError::QueueError {
            reason: e.to_string(),
        }
    })?;

    let status = match health.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    Ok((status, Json(serde_json::to_value(&health).unwrap_or_default())))
}

/// Liveness probe: the process is up and serving
pub async fn liveness_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "alive",
        "timestamp": chrono::Utc::now(),
    }))
}

pub async fn version_info() -> Json<Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
