use chrono::{DateTime, Utc};
use courier_core::types::{DeliveryType, LedgerEntry, LedgerStatus};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "delivery_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DbDeliveryType {
    Token,
    User,
    Topic,
    Bulk,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "ledger_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DbLedgerStatus {
    Pending,
    Sending,
    Success,
    PartialSuccess,
    Failed,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerRow {
    pub id: String,
    pub title: String,
    pub body: String,
    pub delivery_type: DbDeliveryType,
    pub status: DbLedgerStatus,
    pub total_targets: i32,
    pub success_count: i32,
    pub failure_count: i32,
    pub source_controller: Option<String>,
    pub source_action: Option<String>,
    pub idempotency_key: Option<String>,
    pub target_user_id: Option<String>,
    pub target_topic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeviceTokenRow {
    pub token: String,
    pub user_id: String,
    pub platform: Option<String>,
    pub invalidated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DeliveryType> for DbDeliveryType {
    fn from(value: DeliveryType) -> Self {
        match value {
            DeliveryType::Token => DbDeliveryType::Token,
            DeliveryType::User => DbDeliveryType::User,
            DeliveryType::Topic => DbDeliveryType::Topic,
            DeliveryType::Bulk => DbDeliveryType::Bulk,
        }
    }
}

impl From<DbDeliveryType> for DeliveryType {
    fn from(value: DbDeliveryType) -> Self {
        match value {
            DbDeliveryType::Token => DeliveryType::Token,
            DbDeliveryType::User => DeliveryType::User,
            DbDeliveryType::Topic => DeliveryType::Topic,
            DbDeliveryType::Bulk => DeliveryType::Bulk,
        }
    }
}

impl From<LedgerStatus> for DbLedgerStatus {
    fn from(value: LedgerStatus) -> Self {
        match value {
            LedgerStatus::Pending => DbLedgerStatus::Pending,
            LedgerStatus::Sending => DbLedgerStatus::Sending,
            LedgerStatus::Success => DbLedgerStatus::Success,
            LedgerStatus::PartialSuccess => DbLedgerStatus::PartialSuccess,
            LedgerStatus::Failed => DbLedgerStatus::Failed,
            LedgerStatus::Retry => DbLedgerStatus::Retry,
        }
    }
}

impl From<DbLedgerStatus> for LedgerStatus {
    fn from(value: DbLedgerStatus) -> Self {
        match value {
            DbLedgerStatus::Pending => LedgerStatus::Pending,
            DbLedgerStatus::Sending => LedgerStatus::Sending,
            DbLedgerStatus::Success => LedgerStatus::Success,
            DbLedgerStatus::PartialSuccess => LedgerStatus::PartialSuccess,
            DbLedgerStatus::Failed => LedgerStatus::Failed,
            DbLedgerStatus::Retry => LedgerStatus::Retry,
        }
    }
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        LedgerEntry {
            id: row.id,
            title: row.title,
            body: row.body,
            delivery_type: row.delivery_type.into(),
            status: row.status.into(),
            total_targets: row.total_targets.max(0) as u32,
            success_count: row.success_count.max(0) as u32,
            failure_count: row.failure_count.max(0) as u32,
            source_controller: row.source_controller,
            source_action: row.source_action,
            idempotency_key: row.idempotency_key,
            target_user_id: row.target_user_id,
            target_topic: row.target_topic,
            created_at: row.created_at,
            sent_at: row.sent_at,
            completed_at: row.completed_at,
        }
    }
}
