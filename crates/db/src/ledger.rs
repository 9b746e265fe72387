//! Delivery ledger store.
//!
//! The ledger is the durable audit trail: one entry per logical notification,
//! created at admission and finalized exactly once when every target has been
//! accounted for as a success or a failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::types::{new_ledger_id, DeliveryType, LedgerEntry, LedgerStatus};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::StoreError;
use crate::models::{DbLedgerStatus, LedgerRow};
use crate::queries;
use crate::retry::{with_retry, with_retry_then_commit};

/// Metadata captured when a logical notification is admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub title: String,
    pub body: String,
    pub delivery_type: DeliveryType,
    pub total_targets: u32,
    pub source_controller: Option<String>,
    pub source_action: Option<String>,
    pub idempotency_key: Option<String>,
    pub target_user_id: Option<String>,
    pub target_topic: Option<String>,
}

impl NewLedgerEntry {
    pub fn into_entry(self, id: String, now: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id,
            title: self.title,
            body: self.body,
            delivery_type: self.delivery_type,
            status: LedgerStatus::Pending,
            total_targets: self.total_targets,
            success_count: 0,
            failure_count: 0,
            source_controller: self.source_controller,
            source_action: self.source_action,
            idempotency_key: self.idempotency_key,
            target_user_id: self.target_user_id,
            target_topic: self.target_topic,
            created_at: now,
            sent_at: None,
            completed_at: None,
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError>;

    /// Most recent entry for `key` created at or after `since`.
    async fn find_idempotent(
        &self,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// Atomic check-then-create on the entry's idempotency key.
    ///
    /// Returns the entry and whether it was newly created. Entries without a
    /// key are always created.
    async fn find_or_create(
        &self,
        entry: NewLedgerEntry,
        since: DateTime<Utc>,
    ) -> Result<(LedgerEntry, bool), StoreError>;

    /// Move an open entry to `SENDING` or `RETRY`. Returns false if the entry
    /// is already finalized.
    async fn mark_status(&self, id: &str, status: LedgerStatus) -> Result<bool, StoreError>;

    /// Add settled recipients to an open entry, finalizing it in the same
    /// transaction when the counts reach `total_targets`.
    async fn increment_counts(
        &self,
        id: &str,
        success_delta: u32,
        failure_delta: u32,
    ) -> Result<LedgerEntry, StoreError>;

    /// Close an open entry. Returns false if it was already finalized.
    async fn finalize(&self, id: &str, status: LedgerStatus) -> Result<bool, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<LedgerEntry>, StoreError>;

    async fn list_recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, StoreError>;
}

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the increment, and the finalize it triggers, inside an open
    /// transaction. The caller commits.
    async fn stage_increment(
        &self,
        id: &str,
        success_delta: u32,
        failure_delta: u32,
    ) -> Result<(Transaction<'static, Postgres>, LedgerRow), StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = queries::ledger::increment_counts(
            &mut *tx,
            id,
            success_delta as i32,
            failure_delta as i32,
        )
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(match queries::ledger::get_by_id(&self.pool, id).await? {
                None => StoreError::NotFound(id.to_string()),
                Some(existing) if existing.completed_at.is_some() => StoreError::Rejected {
                    id: id.to_string(),
                    reason: "entry already finalized".to_string(),
                },
                Some(_) => StoreError::Rejected {
                    id: id.to_string(),
                    reason: "counts would exceed total_targets".to_string(),
                },
            });
        };

        let row = if row.success_count + row.failure_count == row.total_targets {
            let status = LedgerStatus::from_counts(
                row.success_count.max(0) as u32,
                row.failure_count.max(0) as u32,
            );
            queries::ledger::finalize(&mut *tx, id, status.into())
                .await?
                .unwrap_or(row)
        } else {
            row
        };

        Ok((tx, row))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let id = new_ledger_id();
        with_retry("ledger.create", || async {
            let mut conn = self.pool.acquire().await?;
            let row = queries::ledger::create(&mut conn, &id, &entry).await?;
            Ok::<_, StoreError>(row.into())
        })
        .await
    }

    async fn find_idempotent(
        &self,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        with_retry("ledger.find_idempotent", || async {
            let mut conn = self.pool.acquire().await?;
            let row = queries::ledger::find_idempotent(&mut conn, key, since).await?;
            Ok::<_, StoreError>(row.map(Into::into))
        })
        .await
    }

    async fn find_or_create(
        &self,
        entry: NewLedgerEntry,
        since: DateTime<Utc>,
    ) -> Result<(LedgerEntry, bool), StoreError> {
        let Some(key) = entry.idempotency_key.clone() else {
            return self.create_entry(entry).await.map(|created| (created, true));
        };
        let id = new_ledger_id();
        with_retry("ledger.find_or_create", || async {
            let (row, created) =
                queries::ledger::find_or_create(&self.pool, &id, &entry, &key, since).await?;
            // A replay after a lost commit ack finds its own insert.
            let created = created || row.id == id;
            Ok::<_, StoreError>((row.into(), created))
        })
        .await
    }

    async fn mark_status(&self, id: &str, status: LedgerStatus) -> Result<bool, StoreError> {
        if status.is_final() {
            return Err(StoreError::Rejected {
                id: id.to_string(),
                reason: "final statuses are set by finalize".to_string(),
            });
        }
        with_retry("ledger.mark_status", || async {
            let updated =
                queries::ledger::mark_status(&self.pool, id, DbLedgerStatus::from(status)).await?;
            Ok::<_, StoreError>(updated)
        })
        .await
    }

    async fn increment_counts(
        &self,
        id: &str,
        success_delta: u32,
        failure_delta: u32,
    ) -> Result<LedgerEntry, StoreError> {
        with_retry_then_commit(
            "ledger.increment_counts",
            || self.stage_increment(id, success_delta, failure_delta),
            |(tx, row): (Transaction<'static, Postgres>, LedgerRow)| async move {
                tx.commit().await?;
                Ok::<_, StoreError>(LedgerEntry::from(row))
            },
        )
        .await
    }

    async fn finalize(&self, id: &str, status: LedgerStatus) -> Result<bool, StoreError> {
        with_retry("ledger.finalize", || async {
            let mut conn = self.pool.acquire().await?;
            let row = queries::ledger::finalize(&mut conn, id, status.into()).await?;
            Ok::<_, StoreError>(row.is_some())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        with_retry("ledger.get", || async {
            let row = queries::ledger::get_by_id(&self.pool, id).await?;
            Ok::<_, StoreError>(row.map(Into::into))
        })
        .await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        with_retry("ledger.list_recent", || async {
            let rows = queries::ledger::list_recent(&self.pool, limit as i64).await?;
            Ok::<_, StoreError>(rows.into_iter().map(Into::into).collect())
        })
        .await
    }
}
