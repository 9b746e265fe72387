use axum::{extract::State, http::StatusCode, routing::post, Extension, Json, Router};
use chrono::{DateTime, Utc};
use courier_core::types::{JobType, Payload, Priority, Target};
use courier_worker::{Admission, BatchOptions, JobOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    error::{AppError, ApiResult},
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/notifications", post(send_notification))
        .route("/v1/notifications/batch", post(send_batch))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    target: Target,
    title: String,
    body: String,
    image: Option<String>,
    #[serde(default)]
    data: BTreeMap<String, String>,
    #[serde(default)]
    priority: Priority,
    scheduled_at: Option<DateTime<Utc>>,
    max_retries: Option<u32>,
    source_controller: Option<String>,
    source_action: Option<String>,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendNotificationResponse {
    status: &'static str,
    job_id: Option<String>,
    ledger_entry_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBatchRequest {
    #[serde(rename = "type")]
    job_type: JobType,
    targets: Vec<String>,
    title: String,
    body: String,
    image: Option<String>,
    #[serde(default)]
    data: BTreeMap<String, String>,
    batch_size: Option<usize>,
    batch_delay_ms: Option<u64>,
    #[serde(default)]
    priority: Priority,
    scheduled_at: Option<DateTime<Utc>>,
    max_retries: Option<u32>,
    source_controller: Option<String>,
    source_action: Option<String>,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendBatchResponse {
    status: &'static str,
    batch_id: Option<String>,
    job_ids: Vec<String>,
    ledger_entry_id: String,
}

fn payload(
    title: String,
    body: String,
    image: Option<String>,
    data: BTreeMap<String, String>,
) -> Payload {
    Payload {
        title,
        body,
        image,
        data,
    }
}

async fn send_notification(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<SendNotificationRequest>,
) -> ApiResult<(StatusCode, Json<SendNotificationResponse>)> {
    let options = JobOptions {
        priority: req.priority,
        scheduled_at: req.scheduled_at,
        max_retries: req.max_retries,
        source_controller: req.source_controller,
        source_action: req.source_action,
        force: req.force,
    };

    let admission = state
        .queue
        .add_job(
            req.target,
            payload(req.title, req.body, req.image, req.data),
            options,
        )
        .await
        .map_err(|err| AppError::from(err).with_request_id(&request_id.0))?;

    let (status, response) = match admission {
        Admission::Queued {
            job_id,
            ledger_entry_id,
        } => (
            StatusCode::ACCEPTED,
            SendNotificationResponse {
                status: "queued",
                job_id: Some(job_id),
                ledger_entry_id,
            },
        ),
        Admission::Duplicate {
            ledger_entry_id,
            job_id,
        } => (
            StatusCode::OK,
            SendNotificationResponse {
                status: "duplicate",
                job_id,
                ledger_entry_id,
            },
        ),
    };
    Ok((status, Json(response)))
}

async fn send_batch(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<SendBatchRequest>,
) -> ApiResult<(StatusCode, Json<SendBatchResponse>)> {
    let options = BatchOptions {
        batch_size: req.batch_size,
        batch_delay_ms: req.batch_delay_ms,
        priority: req.priority,
        scheduled_at: req.scheduled_at,
        max_retries: req.max_retries,
        source_controller: req.source_controller,
        source_action: req.source_action,
        force: req.force,
    };

    let admission = state
        .queue
        .add_batch_jobs(
            req.job_type,
            req.targets,
            payload(req.title, req.body, req.image, req.data),
            options,
        )
        .await
        .map_err(|err| AppError::from(err).with_request_id(&request_id.0))?;

    let status = if admission.duplicate {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        status,
        Json(SendBatchResponse {
            status: if admission.duplicate { "duplicate" } else { "queued" },
            batch_id: admission.batch_id,
            job_ids: admission.job_ids,
            ledger_entry_id: admission.ledger_entry_id,
        }),
    ))
}
