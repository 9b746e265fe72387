//! In-process ledger for development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::types::{new_ledger_id, LedgerEntry, LedgerStatus};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::StoreError;
use crate::ledger::{LedgerStore, NewLedgerEntry};

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, LedgerEntry>,
    order: Vec<String>,
}

impl Entries {
    fn insert(&mut self, entry: LedgerEntry) -> LedgerEntry {
        self.order.push(entry.id.clone());
        self.by_id.insert(entry.id.clone(), entry.clone());
        entry
    }

    fn find_idempotent(&self, key: &str, since: DateTime<Utc>) -> Option<&LedgerEntry> {
        self.order.iter().rev().find_map(|id| {
            self.by_id.get(id).filter(|entry| {
                entry.idempotency_key.as_deref() == Some(key) && entry.created_at >= since
            })
        })
    }

    fn finalize(&mut self, id: &str, status: LedgerStatus) -> Result<bool, StoreError> {
        let entry = self
            .by_id
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if entry.completed_at.is_some() {
            return Ok(false);
        }
        let now = Utc::now();
        entry.status = status;
        entry.sent_at.get_or_insert(now);
        entry.completed_at = Some(now);
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    entries: Mutex<Entries>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn create_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let entry = entry.into_entry(new_ledger_id(), Utc::now());
        Ok(self.entries.lock().insert(entry))
    }

    async fn find_idempotent(
        &self,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.entries.lock().find_idempotent(key, since).cloned())
    }

    async fn find_or_create(
        &self,
        entry: NewLedgerEntry,
        since: DateTime<Utc>,
    ) -> Result<(LedgerEntry, bool), StoreError> {
        let mut entries = self.entries.lock();
        if let Some(key) = entry.idempotency_key.as_deref() {
            if let Some(existing) = entries.find_idempotent(key, since) {
                return Ok((existing.clone(), false));
            }
        }
        let created = entries.insert(entry.into_entry(new_ledger_id(), Utc::now()));
        Ok((created, true))
    }

    async fn mark_status(&self, id: &str, status: LedgerStatus) -> Result<bool, StoreError> {
        if status.is_final() {
            return Err(StoreError::Rejected {
                id: id.to_string(),
                reason: "final statuses are set by finalize".to_string(),
            });
        }
        let mut entries = self.entries.lock();
        let entry = entries
            .by_id
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if entry.completed_at.is_some() {
            return Ok(false);
        }
        entry.status = status;
        if status == LedgerStatus::Sending {
            entry.sent_at.get_or_insert_with(Utc::now);
        }
        Ok(true)
    }

    async fn increment_counts(
        &self,
        id: &str,
        success_delta: u32,
        failure_delta: u32,
    ) -> Result<LedgerEntry, StoreError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .by_id
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if entry.completed_at.is_some() {
            return Err(StoreError::Rejected {
                id: id.to_string(),
                reason: "entry already finalized".to_string(),
            });
        }
        let accounted = entry.accounted() + success_delta + failure_delta;
        if accounted > entry.total_targets {
            return Err(StoreError::Rejected {
                id: id.to_string(),
                reason: "counts would exceed total_targets".to_string(),
            });
        }

        entry.success_count += success_delta;
        entry.failure_count += failure_delta;

        if accounted == entry.total_targets {
            let status = LedgerStatus::from_counts(entry.success_count, entry.failure_count);
            entries.finalize(id, status)?;
        }

        entries
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn finalize(&self, id: &str, status: LedgerStatus) -> Result<bool, StoreError> {
        self.entries.lock().finalize(id, status)
    }

    async fn get(&self, id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.entries.lock().by_id.get(id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        let entries = self.entries.lock();
        Ok(entries
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| entries.by_id.get(id).cloned())
            .collect())
    }
}
