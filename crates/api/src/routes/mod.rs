pub mod batches;
pub mod health;
pub mod jobs;
pub mod ledger;
pub mod metrics;
pub mod notifications;

use axum::{middleware::from_fn, Router};

use crate::middleware::request_id::request_id;
use crate::state::AppState;

pub fn v1_router(state: AppState) -> Router {
    Router::new()
        .merge(notifications::router(state.clone()))
        .merge(jobs::router(state.clone()))
        .merge(batches::router(state.clone()))
        .merge(metrics::router(state.clone()))
        .merge(ledger::router(state))
}

pub fn health_router(state: AppState) -> Router {
    health::router(state)
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health_router(state.clone()))
        .merge(v1_router(state))
        .layer(from_fn(request_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use courier_core::types::{Payload, RecipientResult, TopicResult};
    use courier_db::{MemoryLedgerStore, MemoryTokenRegistry};
    use courier_worker::{NotificationQueue, ProviderError, PushProvider, QueueConfig};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct AcceptAll;

    #[async_trait]
    impl PushProvider for AcceptAll {
        async fn send_chunk(
            &self,
            recipients: &[String],
            _payload: &Payload,
        ) -> Result<Vec<RecipientResult>, ProviderError> {
            Ok(recipients.iter().map(RecipientResult::success).collect())
        }

        async fn send_topic(
            &self,
            _topic: &str,
            _payload: &Payload,
        ) -> Result<TopicResult, ProviderError> {
            Ok(TopicResult {
                ok: true,
                error_kind: None,
                message_id: None,
            })
        }
    }

    /// Router over a queue that is never started, so jobs stay pending.
    fn test_app() -> Router {
        let queue = NotificationQueue::new(
            QueueConfig::default(),
            Arc::new(AcceptAll),
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(MemoryTokenRegistry::new()),
        )
        .unwrap();
        app(AppState {
            queue: Arc::new(queue),
            courier_env: "test".to_string(),
        })
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn notification(tokens: &[&str]) -> Value {
        json!({
            "target": {"type": "tokens", "value": tokens},
            "title": "Order shipped",
            "body": "Your order is on its way",
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response.headers().get("X-Request-Id").unwrap();
        assert!(request_id.to_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let app = test_app();
        let response = app
            .clone()
            .oneshot(
                Request::get("/health")
                    .header("X-Request-Id", "trace-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get("X-Request-Id").unwrap(), "trace-123");
    }

    #[tokio::test]
    async fn test_send_notification_queues_job() {
        let app = test_app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/notifications",
            Some(notification(&["t1", "t2"])),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
        let job_id = body["jobId"].as_str().unwrap().to_string();
        let ledger_entry_id = body["ledgerEntryId"].as_str().unwrap().to_string();

        let (status, job) = call(&app, Method::GET, &format!("/v1/jobs/{}", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "pending");
        assert_eq!(job["remaining"], json!(["t1", "t2"]));

        let (status, entry) = call(
            &app,
            Method::GET,
            &format!("/v1/ledger/{}", ledger_entry_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(entry["status"], "PENDING");
        assert_eq!(entry["totalTargets"], 2);
    }

    #[tokio::test]
    async fn test_send_notification_rejects_blank_title() {
        let app = test_app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/notifications",
            Some(json!({
                "target": {"type": "topic", "value": "news"},
                "title": " ",
                "body": "Body",
            })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_request");
        assert!(body["error"]["request_id"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn test_duplicate_notification() {
        let app = test_app();
        let mut request = notification(&["t1"]);
        request["sourceController"] = json!("orders");
        request["sourceAction"] = json!("shipped:42");

        let (status, first) =
            call(&app, Method::POST, "/v1/notifications", Some(request.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, second) = call(&app, Method::POST, "/v1/notifications", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["status"], "duplicate");
        assert_eq!(second["ledgerEntryId"], first["ledgerEntryId"]);
        assert_eq!(second["jobId"], first["jobId"]);
    }

    #[tokio::test]
    async fn test_batch_and_batch_status() {
        let app = test_app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/notifications/batch",
            Some(json!({
                "type": "token_list",
                "targets": ["a", "b", "c", "d", "e"],
                "title": "Sale",
                "body": "Everything must go",
                "batchSize": 2,
            })),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["jobIds"].as_array().unwrap().len(), 3);
        let batch_id = body["batchId"].as_str().unwrap().to_string();

        let (status, batch) =
            call(&app, Method::GET, &format!("/v1/batches/{}", batch_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(batch["batchId"], batch_id);
        assert_eq!(batch["totalJobs"], 3);
        assert_eq!(batch["pendingJobs"], 3);

        let (status, _) = call(&app, Method::GET, "/v1/batches/batch_missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_batch_rejects_topic_type() {
        let app = test_app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/notifications/batch",
            Some(json!({
                "type": "topic",
                "targets": ["news"],
                "title": "Sale",
                "body": "Everything must go",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "topic targets cannot be batched");
    }

    #[tokio::test]
    async fn test_cancel_job() {
        let app = test_app();
        let (_, body) = call(
            &app,
            Method::POST,
            "/v1/notifications",
            Some(notification(&["t1"])),
        )
        .await;
        let uri = format!("/v1/jobs/{}", body["jobId"].as_str().unwrap());

        let (status, _) = call(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "conflict");

        let (status, _) = call(&app, Method::DELETE, "/v1/jobs/job_missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_and_ledger_listing() {
        let app = test_app();
        for token in ["t1", "t2"] {
            call(
                &app,
                Method::POST,
                "/v1/notifications",
                Some(notification(&[token])),
            )
            .await;
        }

        let (status, metrics) = call(&app, Method::GET, "/v1/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(metrics["totalJobs"], 2);
        assert_eq!(metrics["pendingJobs"], 2);

        let (status, ledger) = call(&app, Method::GET, "/v1/ledger?limit=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ledger["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let app = test_app();
        let (status, body) = call(&app, Method::GET, "/v1/jobs/job_missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }
}
