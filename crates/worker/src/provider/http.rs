use async_trait::async_trait;
use chrono::Utc;
use courier_core::digest::sign_payload;
use courier_core::types::{ErrorKind, Payload, RecipientResult, TopicResult};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::gateway::{ProviderError, PushProvider};

/// Push provider speaking the JSON relay protocol over HTTPS.
///
/// Requests carry a bearer key when configured and, when a signing secret is
/// set, an HMAC-SHA256 signature of `"{timestamp}.{body}"`.
#[derive(Clone)]
pub struct HttpPushProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    signing_secret: Option<String>,
}

impl HttpPushProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        signing_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            signing_secret,
        })
    }

    async fn post(&self, url: String, body: String) -> Result<reqwest::Response, ProviderError> {
        let timestamp = Utc::now().timestamp();

        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Courier-Timestamp", timestamp.to_string());

        if let Some(secret) = self.signing_secret.as_deref() {
            req = req.header("X-Courier-Signature", sign_payload(secret, timestamp, &body));
        }
        if let Some(key) = self.api_key.as_deref() {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.body(body).send().await?;
        match status_error(resp.status()) {
            Some(err) => Err(err),
            None => Ok(resp),
        }
    }
}

#[derive(Debug, Serialize)]
struct Notification<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens: Option<&'a [String]>,
    notification: Notification<'a>,
    data: &'a BTreeMap<String, String>,
}

impl<'a> MessageRequest<'a> {
    fn new(tokens: Option<&'a [String]>, payload: &'a Payload) -> Self {
        Self {
            tokens,
            notification: Notification {
                title: &payload.title,
                body: &payload.body,
                image: payload.image.as_deref(),
            },
            data: &payload.data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    results: Vec<TokenOutcome>,
}

#[derive(Debug, Deserialize)]
struct TokenOutcome {
    token: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopicResponse {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Map an HTTP status to the error it represents, if any.
fn status_error(status: StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(ProviderError::RateLimited)
    } else if status.is_server_error() {
        Some(ProviderError::Unavailable(format!("HTTP {}", status.as_u16())))
    } else {
        Some(ProviderError::Rejected(format!("HTTP {}", status.as_u16())))
    }
}

/// Map a per-recipient provider error code to an [`ErrorKind`].
fn error_kind(code: &str) -> ErrorKind {
    match code {
        "invalid_token" | "unregistered" | "not_registered" | "invalid_registration" => {
            ErrorKind::InvalidToken
        }
        "rate_limited" | "quota_exceeded" => ErrorKind::RateLimited,
        "unavailable" | "internal" => ErrorKind::ProviderUnavailable,
        _ => ErrorKind::Unknown,
    }
}

fn to_result(outcome: TokenOutcome) -> RecipientResult {
    match outcome.error {
        None => RecipientResult::success(outcome.token),
        Some(code) => RecipientResult::failure(outcome.token, error_kind(&code)),
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send_chunk(
        &self,
        recipients: &[String],
        payload: &Payload,
    ) -> Result<Vec<RecipientResult>, ProviderError> {
        let body = serde_json::to_string(&MessageRequest::new(Some(recipients), payload))
            .map_err(|err| ProviderError::Rejected(err.to_string()))?;
        let resp = self
            .post(format!("{}/v1/messages", self.base_url), body)
            .await?;
        let parsed: MessageResponse = resp.json().await?;
        Ok(parsed.results.into_iter().map(to_result).collect())
    }

    async fn send_topic(&self, topic: &str, payload: &Payload) -> Result<TopicResult, ProviderError> {
        let body = serde_json::to_string(&MessageRequest::new(None, payload))
            .map_err(|err| ProviderError::Rejected(err.to_string()))?;
        let resp = self
            .post(format!("{}/v1/topics/{}/messages", self.base_url, topic), body)
            .await?;
        let parsed: TopicResponse = resp.json().await?;
        Ok(match parsed.error {
            None => TopicResult {
                ok: true,
                error_kind: None,
                message_id: parsed.message_id,
            },
            Some(code) => TopicResult {
                ok: false,
                error_kind: Some(error_kind(&code)),
                message_id: None,
            },
        })
    }
}
