use axum::{extract::State, routing::get, Json, Router};
use courier_core::types::MetricsSnapshot;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/metrics", get(metrics))
        .with_state(state)
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.queue.metrics())
}
