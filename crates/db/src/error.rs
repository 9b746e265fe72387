use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("ledger entry not found: {0}")]
    NotFound(String),
    #[error("ledger entry {id} rejected update: {reason}")]
    Rejected { id: String, reason: String },
}

impl StoreError {
    /// Errors worth retrying at the store layer before surfacing.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed
            ),
            StoreError::Unavailable(_) => true,
            StoreError::NotFound(_) | StoreError::Rejected { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!StoreError::NotFound("ntf_1".into()).is_transient());
        assert!(!StoreError::Rejected {
            id: "ntf_1".into(),
            reason: "finalized".into()
        }
        .is_transient());
    }
}
