use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use courier_core::types::LedgerEntry;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, ApiResult},
    state::{AppState, RequestId},
};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/ledger", get(list_entries))
        .route("/v1/ledger/{id}", get(get_entry))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct Pagination {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ListEntriesResponse {
    items: Vec<LedgerEntry>,
}

async fn list_entries(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<ListEntriesResponse>> {
    let limit = pagination.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let items = state
        .queue
        .recent_ledger_entries(limit)
        .await
        .map_err(|err| AppError::from(err).with_request_id(&request_id.0))?;
    Ok(Json(ListEntriesResponse { items }))
}

async fn get_entry(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<LedgerEntry>> {
    state
        .queue
        .ledger_entry(&id)
        .await
        .map_err(|err| AppError::from(err).with_request_id(&request_id.0))?
        .map(Json)
        .ok_or_else(|| {
            AppError::NotFound("ledger entry not found".to_string()).with_request_id(&request_id.0)
        })
}
