//! Provider gateway.
//!
//! Wraps a [`PushProvider`] so that callers only ever see per-recipient
//! results: transport errors, timeouts and short responses are folded into
//! failed [`RecipientResult`]s, and tokens the provider reports as invalid are
//! pruned from the token registry.

use async_trait::async_trait;
use courier_core::types::{ErrorKind, Payload, RecipientResult, TopicResult};
use courier_db::TokenRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RateLimited => ErrorKind::RateLimited,
            ProviderError::Unavailable(_) => ErrorKind::ProviderUnavailable,
            ProviderError::Rejected(_) | ProviderError::Transport(_) => ErrorKind::Unknown,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProviderError::Unavailable(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// A push provider able to deliver to device tokens and topics.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send_chunk(
        &self,
        recipients: &[String],
        payload: &Payload,
    ) -> Result<Vec<RecipientResult>, ProviderError>;

    async fn send_topic(&self, topic: &str, payload: &Payload)
        -> Result<TopicResult, ProviderError>;
}

pub struct ProviderGateway {
    provider: Arc<dyn PushProvider>,
    timeout: Duration,
    tokens: Option<Arc<dyn TokenRegistry>>,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn PushProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            tokens: None,
        }
    }

    pub fn with_token_registry(mut self, tokens: Arc<dyn TokenRegistry>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub async fn send_chunk(&self, recipients: &[String], payload: &Payload) -> Vec<RecipientResult> {
        if recipients.is_empty() {
            return Vec::new();
        }

        let results = match tokio::time::timeout(
            self.timeout,
            self.provider.send_chunk(recipients, payload),
        )
        .await
        {
            Ok(Ok(results)) => reconcile(recipients, results),
            Ok(Err(err)) => {
                warn!(error = %err, size = recipients.len(), "gateway: chunk send failed");
                fail_all(recipients, err.kind())
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    size = recipients.len(),
                    "gateway: chunk send timed out"
                );
                fail_all(recipients, ErrorKind::ProviderUnavailable)
            }
        };

        self.prune_invalid(&results).await;
        results
    }

    pub async fn send_topic(&self, topic: &str, payload: &Payload) -> TopicResult {
        match tokio::time::timeout(self.timeout, self.provider.send_topic(topic, payload)).await {
            Ok(Ok(result)) if !result.ok && result.error_kind.is_none() => TopicResult {
                error_kind: Some(ErrorKind::Unknown),
                ..result
            },
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(topic, error = %err, "gateway: topic send failed");
                TopicResult {
                    ok: false,
                    error_kind: Some(err.kind()),
                    message_id: None,
                }
            }
            Err(_) => {
                warn!(topic, "gateway: topic send timed out");
                TopicResult {
                    ok: false,
                    error_kind: Some(ErrorKind::ProviderUnavailable),
                    message_id: None,
                }
            }
        }
    }

    async fn prune_invalid(&self, results: &[RecipientResult]) {
        let Some(tokens) = &self.tokens else {
            return;
        };
        let invalid: Vec<String> = results
            .iter()
            .filter(|r| r.error_kind == Some(ErrorKind::InvalidToken))
            .map(|r| r.recipient.clone())
            .collect();
        if invalid.is_empty() {
            return;
        }
        match tokens.prune_tokens(&invalid).await {
            Ok(pruned) => info!(pruned, "gateway: pruned invalid tokens"),
            Err(err) => error!(error = %err, "gateway: failed to prune invalid tokens"),
        }
    }
}

/// Line provider results up with the request. Recipients the provider did
/// not answer for are reported as `Unknown` failures.
fn reconcile(recipients: &[String], results: Vec<RecipientResult>) -> Vec<RecipientResult> {
    let mut by_recipient: HashMap<String, RecipientResult> = HashMap::with_capacity(results.len());
    for result in results {
        by_recipient.entry(result.recipient.clone()).or_insert(result);
    }

    recipients
        .iter()
        .map(|recipient| match by_recipient.remove(recipient) {
            Some(result) if !result.ok && result.error_kind.is_none() => {
                RecipientResult::failure(recipient.clone(), ErrorKind::Unknown)
            }
            Some(result) => result,
            None => RecipientResult::failure(recipient.clone(), ErrorKind::Unknown),
        })
        .collect()
}

fn fail_all(recipients: &[String], kind: ErrorKind) -> Vec<RecipientResult> {
    recipients
        .iter()
        .map(|recipient| RecipientResult::failure(recipient.clone(), kind))
        .collect()
}
