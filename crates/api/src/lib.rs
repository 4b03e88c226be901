//! HTTP surface of the run-orchestration engine: health reporting plus
//! manual run triggering and lookup. Everything else happens on the queues.

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::create_router())
        .merge(routes::runs::create_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
