//! In-memory job store.
//!
//! Jobs live in an arena of slots with a free list. Pending jobs sit in one of
//! two ordered indexes: `ready` (due now, ordered for dispatch) or `delayed`
//! (ordered by due time, promoted into `ready` on every claim). All state is
//! behind one mutex so a claim is atomic with removal from the ready set.

use chrono::{DateTime, Utc};
use courier_core::types::{BatchStatus, JobId, JobStatus, NotificationJob, Priority};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use crate::error::{CancelError, JobStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: Reverse<Priority>,
    due_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    seq: u64,
    slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DelayedKey {
    due_at: DateTime<Utc>,
    seq: u64,
    slot: usize,
}

#[derive(Debug, Clone, Copy)]
enum Queued {
    Ready(ReadyKey),
    Delayed(DelayedKey),
}

#[derive(Debug)]
struct Slot {
    job: NotificationJob,
    seq: u64,
    queued: Option<Queued>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    by_id: HashMap<JobId, usize>,
    by_batch: HashMap<String, Vec<JobId>>,
    by_ledger: HashMap<String, Vec<JobId>>,
    ready: BTreeSet<ReadyKey>,
    delayed: BTreeSet<DelayedKey>,
    next_seq: u64,
}

impl Inner {
    fn slot(&self, id: &str) -> Option<&Slot> {
        let index = *self.by_id.get(id)?;
        self.slots.get(index)?.as_ref()
    }

    fn allocate(&mut self, job: NotificationJob) -> usize {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(batch_id) = &job.batch_id {
            self.by_batch
                .entry(batch_id.clone())
                .or_default()
                .push(job.id.clone());
        }
        self.by_ledger
            .entry(job.ledger_entry_id.clone())
            .or_default()
            .push(job.id.clone());

        let id = job.id.clone();
        let slot = Slot {
            job,
            seq,
            queued: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.by_id.insert(id, index);
        index
    }

    fn enqueue(&mut self, index: usize, now: DateTime<Utc>) {
        let Some(slot) = self.slots.get_mut(index).and_then(Option::as_mut) else {
            return;
        };
        let due_at = slot.job.scheduled_at.unwrap_or(slot.job.created_at);
        let queued = if slot.job.is_due(now) {
            let key = ReadyKey {
                priority: Reverse(slot.job.priority),
                due_at,
                created_at: slot.job.created_at,
                seq: slot.seq,
                slot: index,
            };
            self.ready.insert(key);
            Queued::Ready(key)
        } else {
            let key = DelayedKey {
                due_at,
                seq: slot.seq,
                slot: index,
            };
            self.delayed.insert(key);
            Queued::Delayed(key)
        };
        slot.queued = Some(queued);
    }

    fn dequeue(&mut self, index: usize) {
        let Some(slot) = self.slots.get_mut(index).and_then(Option::as_mut) else {
            return;
        };
        match slot.queued.take() {
            Some(Queued::Ready(key)) => {
                self.ready.remove(&key);
            }
            Some(Queued::Delayed(key)) => {
                self.delayed.remove(&key);
            }
            None => {}
        }
    }

    fn promote(&mut self, now: DateTime<Utc>) {
        while let Some(key) = self.delayed.first().copied() {
            if key.due_at > now {
                break;
            }
            self.delayed.remove(&key);
            if let Some(slot) = self.slots.get_mut(key.slot).and_then(Option::as_mut) {
                slot.queued = None;
            }
            self.enqueue(key.slot, now);
        }
    }

    /// Replace a claimed job with its updated copy after checking the
    /// transition is legal.
    fn write_back(&mut self, job: NotificationJob) -> Result<usize, JobStoreError> {
        let index = *self
            .by_id
            .get(&job.id)
            .ok_or_else(|| JobStoreError::NotFound(job.id.clone()))?;
        let slot = self
            .slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| JobStoreError::NotFound(job.id.clone()))?;

        if !slot.job.status.can_transition_to(job.status) {
            return Err(JobStoreError::InvalidTransition {
                id: job.id,
                from: slot.job.status,
                to: job.status,
            });
        }
        slot.job = job;
        Ok(index)
    }

    fn remove(&mut self, index: usize) {
        self.dequeue(index);
        let Some(slot) = self.slots.get_mut(index).and_then(Option::take) else {
            return;
        };
        let job = slot.job;
        self.by_id.remove(&job.id);
        if let Some(batch_id) = &job.batch_id {
            unlink(&mut self.by_batch, batch_id, &job.id);
        }
        unlink(&mut self.by_ledger, &job.ledger_entry_id, &job.id);
        self.free.push(index);
    }
}

fn unlink(index: &mut HashMap<String, Vec<JobId>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

#[derive(Debug, Default)]
pub struct JobStore {
    inner: Mutex<Inner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a pending job into the ready or delayed index.
    pub fn insert(&self, job: NotificationJob, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let index = inner.allocate(job);
        inner.enqueue(index, now);
    }

    /// Admit a job that a worker has already claimed.
    pub fn insert_claimed(&self, job: NotificationJob) {
        self.inner.lock().allocate(job);
    }

    /// Promote due jobs, then take the best ready job and mark it processing.
    pub fn claim_next(&self, now: DateTime<Utc>) -> Option<NotificationJob> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.promote(now);

        let key = inner.ready.pop_first()?;
        let slot = inner.slots.get_mut(key.slot)?.as_mut()?;
        slot.queued = None;
        slot.job.status = JobStatus::Processing;
        slot.job.started_at = Some(now);
        Some(slot.job.clone())
    }

    /// Put a retried job back in line.
    pub fn requeue(&self, job: NotificationJob, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        let mut inner = self.inner.lock();
        let index = inner.write_back(job)?;
        inner.enqueue(index, now);
        Ok(())
    }

    /// Record a job's terminal state.
    pub fn finish(&self, job: NotificationJob) -> Result<(), JobStoreError> {
        self.inner.lock().write_back(job).map(|_| ())
    }

    pub fn cancel(&self, id: &str, now: DateTime<Utc>) -> Result<NotificationJob, CancelError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let index = *inner
            .by_id
            .get(id)
            .ok_or_else(|| CancelError::NotFound(id.to_string()))?;
        let status = inner
            .slots
            .get(index)
            .and_then(Option::as_ref)
            .map(|slot| slot.job.status)
            .ok_or_else(|| CancelError::NotFound(id.to_string()))?;
        if status != JobStatus::Pending {
            return Err(CancelError::NotPending {
                id: id.to_string(),
                status,
            });
        }

        inner.dequeue(index);
        let slot = inner
            .slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| CancelError::NotFound(id.to_string()))?;
        slot.job.status = JobStatus::Cancelled;
        slot.job.finished_at = Some(now);
        Ok(slot.job.clone())
    }

    pub fn get(&self, id: &str) -> Option<NotificationJob> {
        self.inner.lock().slot(id).map(|slot| slot.job.clone())
    }

    pub fn jobs_for_ledger(&self, ledger_entry_id: &str) -> Vec<JobId> {
        self.inner
            .lock()
            .by_ledger
            .get(ledger_entry_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a job of the ledger entry other than `except` is waiting on a
    /// retry.
    pub fn has_pending_retry(&self, ledger_entry_id: &str, except: &str) -> bool {
        let inner = self.inner.lock();
        inner.by_ledger.get(ledger_entry_id).is_some_and(|ids| {
            ids.iter()
                .filter(|id| id.as_str() != except)
                .filter_map(|id| inner.slot(id))
                .any(|slot| slot.job.status == JobStatus::Pending && slot.job.retry_count > 0)
        })
    }

    pub fn batch_status(&self, batch_id: &str) -> Option<BatchStatus> {
        let inner = self.inner.lock();
        let ids = inner.by_batch.get(batch_id)?;

        let mut status = BatchStatus::default();
        for slot in ids.iter().filter_map(|id| inner.slot(id)) {
            status.total_jobs += 1;
            match slot.job.status {
                JobStatus::Pending => status.pending_jobs += 1,
                JobStatus::Processing => status.processing_jobs += 1,
                JobStatus::Completed => status.completed_jobs += 1,
                JobStatus::Failed => status.failed_jobs += 1,
                JobStatus::Cancelled => status.cancelled_jobs += 1,
            }
        }
        Some(status)
    }

    pub fn counts(&self) -> StatusCounts {
        let inner = self.inner.lock();
        let mut counts = StatusCounts::default();
        for slot in inner.slots.iter().flatten() {
            counts.total += 1;
            match slot.job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Earliest due time among delayed jobs.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().delayed.first().map(|key| key.due_at)
    }

    /// Drop terminal jobs that finished at or before `cutoff`.
    pub fn purge_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<usize> = inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let job = &slot.as_ref()?.job;
                let finished = job.finished_at?;
                (job.status.is_terminal() && finished <= cutoff).then_some(index)
            })
            .collect();
        for index in &expired {
            inner.remove(*index);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use courier_core::types::{new_job_id, JobType, Payload, Target};

    fn job(priority: Priority, created_at: DateTime<Utc>) -> NotificationJob {
        let target = Target::Tokens(vec!["tok".into()]);
        NotificationJob {
            id: new_job_id(),
            job_type: JobType::TokenList,
            remaining: target.recipients(),
            target,
            payload: Payload::new("Hi", "There"),
            priority,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            created_at,
            scheduled_at: None,
            started_at: None,
            finished_at: None,
            batch_id: None,
            ledger_entry_id: "ntf_test".into(),
            chunk_delay_ms: 0,
            delivered: 0,
            last_error: None,
            provider_message_id: None,
        }
    }

    #[test]
    fn test_claim_prefers_priority() {
        let store = JobStore::new();
        let now = Utc::now();
        let normal = job(Priority::Normal, now);
        let high = job(Priority::High, now);
        let low = job(Priority::Low, now);
        store.insert(low.clone(), now);
        store.insert(normal.clone(), now);
        store.insert(high.clone(), now);

        assert_eq!(store.claim_next(now).unwrap().id, high.id);
        assert_eq!(store.claim_next(now).unwrap().id, normal.id);
        assert_eq!(store.claim_next(now).unwrap().id, low.id);
        assert!(store.claim_next(now).is_none());
    }

    #[test]
    fn test_claim_ties_break_by_time_then_sequence() {
        let store = JobStore::new();
        let now = Utc::now();
        let later = job(Priority::Normal, now);
        let earlier = job(Priority::Normal, now - Duration::seconds(10));
        let same_a = job(Priority::Normal, now);
        store.insert(later.clone(), now);
        store.insert(earlier.clone(), now);
        store.insert(same_a.clone(), now);

        assert_eq!(store.claim_next(now).unwrap().id, earlier.id);
        assert_eq!(store.claim_next(now).unwrap().id, later.id);
        assert_eq!(store.claim_next(now).unwrap().id, same_a.id);
    }

    #[test]
    fn test_claim_marks_processing() {
        let store = JobStore::new();
        let now = Utc::now();
        let pending = job(Priority::Normal, now);
        store.insert(pending.clone(), now);

        let claimed = store.claim_next(now).unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.started_at, Some(now));
        assert_eq!(store.get(&pending.id).unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_scheduled_job_waits_until_due() {
        let store = JobStore::new();
        let now = Utc::now();
        let mut scheduled = job(Priority::High, now);
        scheduled.scheduled_at = Some(now + Duration::minutes(5));
        store.insert(scheduled.clone(), now);

        assert!(store.claim_next(now).is_none());
        assert!(store.claim_next(now + Duration::minutes(4)).is_none());
        assert_eq!(store.next_due(), scheduled.scheduled_at);

        let claimed = store.claim_next(now + Duration::minutes(5)).unwrap();
        assert_eq!(claimed.id, scheduled.id);
        assert!(store.next_due().is_none());
    }

    #[test]
    fn test_requeue_and_finish() {
        let store = JobStore::new();
        let now = Utc::now();
        store.insert(job(Priority::Normal, now), now);

        let mut claimed = store.claim_next(now).unwrap();
        claimed.status = JobStatus::Pending;
        claimed.retry_count = 1;
        claimed.scheduled_at = Some(now + Duration::seconds(1));
        store.requeue(claimed, now).unwrap();
        assert!(store.claim_next(now).is_none());

        let mut claimed = store.claim_next(now + Duration::seconds(1)).unwrap();
        assert_eq!(claimed.retry_count, 1);
        claimed.status = JobStatus::Completed;
        claimed.finished_at = Some(now);
        store.finish(claimed.clone()).unwrap();

        let counts = store.counts();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.total, 1);

        claimed.status = JobStatus::Pending;
        assert!(matches!(
            store.requeue(claimed, now),
            Err(JobStoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cancel_pending_only() {
        let store = JobStore::new();
        let now = Utc::now();
        let first = job(Priority::Normal, now);
        let second = job(Priority::Normal, now);
        store.insert(first.clone(), now);
        store.insert(second.clone(), now);

        let cancelled = store.cancel(&second.id, now).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        let claimed = store.claim_next(now).unwrap();
        assert_eq!(claimed.id, first.id);
        assert!(store.claim_next(now).is_none());

        assert_eq!(
            store.cancel(&first.id, now).unwrap_err(),
            CancelError::NotPending {
                id: first.id.clone(),
                status: JobStatus::Processing,
            }
        );
        assert_eq!(
            store.cancel("job_missing", now).unwrap_err(),
            CancelError::NotFound("job_missing".into())
        );
    }

    #[test]
    fn test_cancel_delayed_job() {
        let store = JobStore::new();
        let now = Utc::now();
        let mut scheduled = job(Priority::Normal, now);
        scheduled.scheduled_at = Some(now + Duration::minutes(1));
        store.insert(scheduled.clone(), now);

        store.cancel(&scheduled.id, now).unwrap();
        assert!(store.next_due().is_none());
        assert!(store.claim_next(now + Duration::minutes(2)).is_none());
    }

    #[test]
    fn test_batch_status_counts() {
        let store = JobStore::new();
        let now = Utc::now();
        for _ in 0..3 {
            let mut member = job(Priority::Normal, now);
            member.batch_id = Some("batch_1".into());
            store.insert(member, now);
        }

        let mut claimed = store.claim_next(now).unwrap();
        claimed.status = JobStatus::Failed;
        store.finish(claimed).unwrap();
        store.claim_next(now).unwrap();

        let status = store.batch_status("batch_1").unwrap();
        assert_eq!(status.total_jobs, 3);
        assert_eq!(status.failed_jobs, 1);
        assert_eq!(status.processing_jobs, 1);
        assert_eq!(status.pending_jobs, 1);
        assert!(store.batch_status("batch_missing").is_none());
    }

    #[test]
    fn test_has_pending_retry_ignores_the_asking_job() {
        let store = JobStore::new();
        let now = Utc::now();
        let first = job(Priority::Normal, now);
        let second = job(Priority::Normal, now);
        store.insert(first.clone(), now);
        store.insert(second.clone(), now);
        assert!(!store.has_pending_retry("ntf_test", &second.id));

        let mut claimed = store.claim_next(now).unwrap();
        assert_eq!(claimed.id, first.id);
        claimed.status = JobStatus::Pending;
        claimed.retry_count = 1;
        claimed.scheduled_at = Some(now + Duration::seconds(60));
        store.requeue(claimed, now).unwrap();

        assert!(store.has_pending_retry("ntf_test", &second.id));
        assert!(!store.has_pending_retry("ntf_test", &first.id));
        assert!(!store.has_pending_retry("ntf_other", &second.id));
    }

    #[test]
    fn test_purge_terminal_reuses_slots() {
        let store = JobStore::new();
        let now = Utc::now();
        let finished = job(Priority::Normal, now);
        store.insert(finished.clone(), now);

        let mut claimed = store.claim_next(now).unwrap();
        claimed.status = JobStatus::Completed;
        claimed.finished_at = Some(now);
        store.finish(claimed).unwrap();

        assert_eq!(store.purge_terminal(now - Duration::seconds(1)), 0);
        assert_eq!(store.purge_terminal(now), 1);
        assert!(store.get(&finished.id).is_none());
        assert!(store.jobs_for_ledger("ntf_test").is_empty());

        let next = job(Priority::Normal, now);
        store.insert(next.clone(), now);
        assert_eq!(store.inner.lock().slots.len(), 1);
        assert_eq!(store.claim_next(now).unwrap().id, next.id);
    }

    #[test]
    fn test_jobs_for_ledger() {
        let store = JobStore::new();
        let now = Utc::now();
        let member = job(Priority::Normal, now);
        store.insert(member.clone(), now);
        assert_eq!(store.jobs_for_ledger("ntf_test"), vec![member.id]);
    }
}
