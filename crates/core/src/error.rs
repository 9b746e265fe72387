use thiserror::Error;

use crate::types::JobType;

/// Rejections raised synchronously at admission. Nothing is enqueued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("title and body required")]
    MissingContent,
    #[error("target is empty")]
    EmptyTarget,
    #[error("invalid {kind} target: {value:?}")]
    MalformedTarget { kind: JobType, value: String },
    #[error("max_retries {requested} exceeds limit {limit}")]
    TooManyRetries { requested: u32, limit: u32 },
    #[error("batch_size must be greater than zero")]
    ZeroBatchSize,
    #[error("{0} targets cannot be batched")]
    NotBatchable(JobType),
    #[error("batch schedule exceeds the supported time range")]
    ScheduleOverflow,
}
