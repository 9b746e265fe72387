use courier_core::types::JobStatus;
use courier_core::ValidationError;
use courier_db::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("ledger unavailable: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CancelError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {id} is {status:?} and can no longer be cancelled")]
    NotPending { id: String, status: JobStatus },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("provider chunk size must be at least 1")]
    ZeroChunkSize,
    #[error("default batch size must be at least 1")]
    ZeroBatchSize,
    #[error("default max retries {requested} exceeds the limit of {limit}")]
    RetryCeiling { requested: u32, limit: u32 },
    #[error("retry base delay exceeds the max delay")]
    InvertedBackoff,
}

/// Raised by the job store when a write-back does not match the job's state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobStoreError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}
