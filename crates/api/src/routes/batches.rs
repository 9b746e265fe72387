use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};
use courier_core::types::BatchStatus;
use serde::Serialize;

use crate::{
    error::{AppError, ApiResult},
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/batches/{id}", get(get_batch))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    batch_id: String,
    #[serde(flatten)]
    status: BatchStatus,
}

async fn get_batch(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<BatchResponse>> {
    let status = state.queue.batch_status(&batch_id).ok_or_else(|| {
        AppError::NotFound("batch not found".to_string()).with_request_id(&request_id.0)
    })?;
    Ok(Json(BatchResponse { batch_id, status }))
}
