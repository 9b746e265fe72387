//! Notification ledger database operations.
//!
//! One row per logical notification. Counts only move forward and freeze once
//! `completed_at` is set.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::ledger::NewLedgerEntry;
use crate::models::{DbDeliveryType, DbLedgerStatus, LedgerRow};

/// Insert a new ledger entry in `PENDING` state with zeroed counts.
pub async fn create(
    conn: &mut PgConnection,
    id: &str,
    entry: &NewLedgerEntry,
) -> Result<LedgerRow, sqlx::Error> {
    sqlx::query_as::<_, LedgerRow>(
        r#"
        INSERT INTO notification_ledger
            (id, title, body, delivery_type, total_targets, source_controller,
             source_action, idempotency_key, target_user_id, target_topic)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id, title, body, delivery_type, status, total_targets,
                  success_count, failure_count, source_controller, source_action,
                  idempotency_key, target_user_id, target_topic,
                  created_at, sent_at, completed_at
        "#,
    )
    .bind(id)
    .bind(&entry.title)
    .bind(&entry.body)
    .bind(DbDeliveryType::from(entry.delivery_type))
    .bind(entry.total_targets as i32)
    .bind(&entry.source_controller)
    .bind(&entry.source_action)
    .bind(&entry.idempotency_key)
    .bind(&entry.target_user_id)
    .bind(&entry.target_topic)
    .fetch_one(conn)
    .await
}

/// Most recent entry for an idempotency key created at or after `since`.
pub async fn find_idempotent(
    conn: &mut PgConnection,
    idempotency_key: &str,
    since: DateTime<Utc>,
) -> Result<Option<LedgerRow>, sqlx::Error> {
    sqlx::query_as::<_, LedgerRow>(
        r#"
        SELECT id, title, body, delivery_type, status, total_targets,
               success_count, failure_count, source_controller, source_action,
               idempotency_key, target_user_id, target_topic,
               created_at, sent_at, completed_at
        FROM notification_ledger
        WHERE idempotency_key = $1 AND created_at >= $2
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(idempotency_key)
    .bind(since)
    .fetch_optional(conn)
    .await
}

/// Return the live entry for an idempotency key, or create one.
///
/// Concurrent callers with the same key serialize on a transaction-scoped
/// advisory lock, so exactly one of them inserts.
pub async fn find_or_create(
    pool: &PgPool,
    id: &str,
    entry: &NewLedgerEntry,
    idempotency_key: &str,
    since: DateTime<Utc>,
) -> Result<(LedgerRow, bool), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(idempotency_key)
        .execute(&mut *tx)
        .await?;

    if let Some(existing) = find_idempotent(&mut *tx, idempotency_key, since).await? {
        tx.commit().await?;
        return Ok((existing, false));
    }

    let created = create(&mut *tx, id, entry).await?;
    tx.commit().await?;
    Ok((created, true))
}

/// Move an open entry to a non-final status. `SENDING` stamps `sent_at` once.
pub async fn mark_status(
    pool: &PgPool,
    id: &str,
    status: DbLedgerStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE notification_ledger
        SET status = $2,
            sent_at = CASE WHEN $2 = 'SENDING'::ledger_status
                           THEN COALESCE(sent_at, now())
                           ELSE sent_at END
        WHERE id = $1 AND completed_at IS NULL
        "#,
    )
    .bind(id)
    .bind(status)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Atomically add to the counters of an open entry.
///
/// Returns `None` when the entry is missing, already finalized, or the
/// increment would push the counts past `total_targets`.
pub async fn increment_counts(
    conn: &mut PgConnection,
    id: &str,
    success_delta: i32,
    failure_delta: i32,
) -> Result<Option<LedgerRow>, sqlx::Error> {
    sqlx::query_as::<_, LedgerRow>(
        r#"
        UPDATE notification_ledger
        SET success_count = success_count + $2,
            failure_count = failure_count + $3
        WHERE id = $1
          AND completed_at IS NULL
          AND success_count + failure_count + $2 + $3 <= total_targets
        RETURNING id, title, body, delivery_type, status, total_targets,
                  success_count, failure_count, source_controller, source_action,
                  idempotency_key, target_user_id, target_topic,
                  created_at, sent_at, completed_at
        "#,
    )
    .bind(id)
    .bind(success_delta)
    .bind(failure_delta)
    .fetch_optional(conn)
    .await
}

/// Close an entry with its final status. Only the first call has any effect.
pub async fn finalize(
    conn: &mut PgConnection,
    id: &str,
    status: DbLedgerStatus,
) -> Result<Option<LedgerRow>, sqlx::Error> {
    sqlx::query_as::<_, LedgerRow>(
        r#"
        UPDATE notification_ledger
        SET status = $2,
            sent_at = COALESCE(sent_at, now()),
            completed_at = now()
        WHERE id = $1 AND completed_at IS NULL
        RETURNING id, title, body, delivery_type, status, total_targets,
                  success_count, failure_count, source_controller, source_action,
                  idempotency_key, target_user_id, target_topic,
                  created_at, sent_at, completed_at
        "#,
    )
    .bind(id)
    .bind(status)
    .fetch_optional(conn)
    .await
}

/// Fetch a ledger entry by its unique ID.
pub async fn get_by_id(pool: &PgPool, id: &str) -> Result<Option<LedgerRow>, sqlx::Error> {
    sqlx::query_as::<_, LedgerRow>(
        r#"
        SELECT id, title, body, delivery_type, status, total_targets,
               success_count, failure_count, source_controller, source_action,
               idempotency_key, target_user_id, target_topic,
               created_at, sent_at, completed_at
        FROM notification_ledger
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// List the newest entries first, for audit tooling.
pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<LedgerRow>, sqlx::Error> {
    sqlx::query_as::<_, LedgerRow>(
        r#"
        SELECT id, title, body, delivery_type, status, total_targets,
               success_count, failure_count, source_controller, source_action,
               idempotency_key, target_user_id, target_topic,
               created_at, sent_at, completed_at
        FROM notification_ledger
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
