use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::digest::hash_tokens;

pub type JobId = String;
pub type BatchId = String;
pub type LedgerId = String;

pub fn new_job_id() -> JobId {
    format!("job_{}", nanoid::nanoid!(12))
}

pub fn new_batch_id() -> BatchId {
    format!("batch_{}", nanoid::nanoid!(12))
}

pub fn new_ledger_id() -> LedgerId {
    format!("ntf_{}", nanoid::nanoid!(12))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SingleUser,
    TokenList,
    Topic,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SingleUser => "single_user",
            JobType::TokenList => "token_list",
            JobType::Topic => "topic",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a notification is addressed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Target {
    User(String),
    Tokens(Vec<String>),
    Topic(String),
}

impl Target {
    pub fn job_type(&self) -> JobType {
        match self {
            Target::User(_) => JobType::SingleUser,
            Target::Tokens(_) => JobType::TokenList,
            Target::Topic(_) => JobType::Topic,
        }
    }

    /// Recipients that still need an attempt when the job is first admitted.
    pub fn recipients(&self) -> Vec<String> {
        match self {
            Target::User(user_id) => vec![user_id.clone()],
            Target::Tokens(tokens) => tokens.clone(),
            Target::Topic(topic) => vec![topic.clone()],
        }
    }

    /// Number of logical targets this notification is accounted against.
    pub fn logical_count(&self) -> u32 {
        match self {
            Target::Tokens(tokens) => tokens.len() as u32,
            Target::User(_) | Target::Topic(_) => 1,
        }
    }

    /// Stable key used to detect repeated sends of the same business event.
    pub fn idempotency_key(&self) -> String {
        match self {
            Target::User(user_id) => format!("user:{}", user_id),
            Target::Topic(topic) => format!("topic:{}", topic),
            Target::Tokens(tokens) => format!("tokens:{}", hash_tokens(tokens)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Payload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            image: None,
            data: BTreeMap::new(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the job state machine allows moving from `self` to `next`.
    ///
    /// `Processing -> Pending` is the retry re-queue; terminal states are final.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Pending)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub id: JobId,
    pub job_type: JobType,
    pub target: Target,
    /// Recipients still owed an attempt. Shrinks as recipients settle.
    pub remaining: Vec<String>,
    pub payload: Payload,
    pub priority: Priority,
    pub status: JobStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub batch_id: Option<BatchId>,
    pub ledger_entry_id: LedgerId,
    pub chunk_delay_ms: u64,
    pub delivered: u32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
}

impl NotificationJob {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map_or(true, |at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub pending_jobs: usize,
    pub processing_jobs: usize,
    pub cancelled_jobs: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryType {
    Token,
    User,
    Topic,
    Bulk,
}

impl DeliveryType {
    pub fn for_target(target: &Target) -> Self {
        match target {
            Target::User(_) => DeliveryType::User,
            Target::Tokens(_) => DeliveryType::Token,
            Target::Topic(_) => DeliveryType::Topic,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Pending,
    Sending,
    Success,
    PartialSuccess,
    Failed,
    Retry,
}

impl LedgerStatus {
    /// Final status for a fully accounted entry.
    pub fn from_counts(success: u32, failure: u32) -> Self {
        match (success, failure) {
            (_, 0) => LedgerStatus::Success,
            (0, _) => LedgerStatus::Failed,
            _ => LedgerStatus::PartialSuccess,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            LedgerStatus::Success | LedgerStatus::PartialSuccess | LedgerStatus::Failed
        )
    }
}

/// Audit record for one logical notification, independent of retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: LedgerId,
    pub title: String,
    pub body: String,
    pub delivery_type: DeliveryType,
    pub status: LedgerStatus,
    pub total_targets: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub source_controller: Option<String>,
    pub source_action: Option<String>,
    pub idempotency_key: Option<String>,
    pub target_user_id: Option<String>,
    pub target_topic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn accounted(&self) -> u32 {
        self.success_count + self.failure_count
    }

    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidToken,
    RateLimited,
    ProviderUnavailable,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::InvalidToken)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecipientResult {
    pub recipient: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RecipientResult {
    pub fn success(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            ok: true,
            error_kind: None,
        }
    }

    pub fn failure(recipient: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            recipient: recipient.into(),
            ok: false,
            error_kind: Some(kind),
        }
    }

    pub fn is_retryable_failure(&self) -> bool {
        !self.ok && self.error_kind.map_or(true, |kind| kind.is_retryable())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopicResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_jobs: usize,
    pub pending_jobs: usize,
    pub processing_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    pub retried_jobs: u64,
    pub ledger_errors: u64,
    pub average_processing_time_ms: f64,
    pub throughput_per_minute: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_job_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_ledger_status_from_counts() {
        assert_eq!(LedgerStatus::from_counts(3, 0), LedgerStatus::Success);
        assert_eq!(LedgerStatus::from_counts(2, 1), LedgerStatus::PartialSuccess);
        assert_eq!(LedgerStatus::from_counts(0, 3), LedgerStatus::Failed);
    }

    #[test]
    fn test_target_logical_count() {
        assert_eq!(Target::User("u1".into()).logical_count(), 1);
        assert_eq!(Target::Topic("news".into()).logical_count(), 1);
        assert_eq!(
            Target::Tokens(vec!["a".into(), "b".into(), "c".into()]).logical_count(),
            3
        );
    }

    #[test]
    fn test_token_idempotency_key_ignores_order() {
        let a = Target::Tokens(vec!["t1".into(), "t2".into()]);
        let b = Target::Tokens(vec!["t2".into(), "t1".into()]);
        assert_eq!(a.idempotency_key(), b.idempotency_key());
        assert!(a.idempotency_key().starts_with("tokens:"));
    }

    #[test]
    fn test_invalid_token_is_not_retryable() {
        assert!(!RecipientResult::failure("t", ErrorKind::InvalidToken).is_retryable_failure());
        assert!(RecipientResult::failure("t", ErrorKind::RateLimited).is_retryable_failure());
        assert!(!RecipientResult::success("t").is_retryable_failure());
    }

    #[test]
    fn test_target_serialization() {
        let json = serde_json::to_string(&Target::Topic("news".into())).unwrap();
        assert_eq!(json, r#"{"type":"topic","value":"news"}"#);
    }

    #[test]
    fn test_ledger_enums_serialize_uppercase() {
        let json = serde_json::to_string(&LedgerStatus::PartialSuccess).unwrap();
        assert_eq!(json, "\"PARTIAL_SUCCESS\"");
        let json = serde_json::to_string(&DeliveryType::Bulk).unwrap();
        assert_eq!(json, "\"BULK\"");
    }
}
