use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use courier_core::types::NotificationJob;

use crate::{
    error::{AppError, ApiResult},
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/jobs/{id}", get(get_job).delete(cancel_job))
        .with_state(state)
}

async fn get_job(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<NotificationJob>> {
    state
        .queue
        .job_status(&job_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("job not found".to_string()).with_request_id(&request_id.0))
}

async fn cancel_job(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .queue
        .cancel_job(&job_id)
        .await
        .map_err(|err| AppError::from(err).with_request_id(&request_id.0))?;
    Ok(StatusCode::NO_CONTENT)
}
