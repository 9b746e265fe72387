//! Submission and query surface of the notification queue.

use chrono::{DateTime, Utc};
use courier_core::types::{
    new_batch_id, new_job_id, BatchId, BatchStatus, DeliveryType, JobId, JobStatus, JobType,
    LedgerEntry, LedgerId, MetricsSnapshot, NotificationJob, Payload, Priority, Target,
};
use courier_core::validate::{validate_max_retries, validate_payload, validate_target};
use courier_core::ValidationError;
use courier_db::{LedgerStore, NewLedgerEntry, StoreError, TokenRegistry};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::error::{CancelError, ConfigError, SubmitError};
use crate::gateway::{ProviderGateway, PushProvider};
use crate::jobs::delivery::{account, handle_delivery_job};
use crate::metrics::{self, LifecycleEvent, MetricsAggregator};
use crate::scheduler::{Dispatcher, PURGE_INTERVAL};
use crate::splitter::split_targets;
use crate::state::WorkerState;
use crate::store::JobStore;

#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: Priority,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Falls back to the queue default.
    pub max_retries: Option<u32>,
    pub source_controller: Option<String>,
    pub source_action: Option<String>,
    /// Skip the idempotency check.
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub batch_size: Option<usize>,
    pub batch_delay_ms: Option<u64>,
    pub priority: Priority,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: Option<u32>,
    pub source_controller: Option<String>,
    pub source_action: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Queued {
        job_id: JobId,
        ledger_entry_id: LedgerId,
    },
    /// The same business event was already admitted inside the idempotency
    /// window. `job_id` is present while that job is still held in memory.
    Duplicate {
        ledger_entry_id: LedgerId,
        job_id: Option<JobId>,
    },
}

impl Admission {
    pub fn ledger_entry_id(&self) -> &str {
        match self {
            Admission::Queued { ledger_entry_id, .. }
            | Admission::Duplicate { ledger_entry_id, .. } => ledger_entry_id,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            Admission::Queued { job_id, .. } => Some(job_id),
            Admission::Duplicate { job_id, .. } => job_id.as_deref(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Admission::Duplicate { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAdmission {
    /// `None` for a duplicate whose jobs have already been purged.
    pub batch_id: Option<BatchId>,
    pub job_ids: Vec<JobId>,
    pub ledger_entry_id: LedgerId,
    pub duplicate: bool,
}

pub struct NotificationQueue {
    config: QueueConfig,
    state: WorkerState,
    permits: Arc<Semaphore>,
    aggregator: Arc<RwLock<MetricsAggregator>>,
    metrics_rx: Mutex<Option<mpsc::UnboundedReceiver<LifecycleEvent>>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    metrics_cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    aggregator_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl NotificationQueue {
    pub fn new(
        config: QueueConfig,
        provider: Arc<dyn PushProvider>,
        ledger: Arc<dyn LedgerStore>,
        tokens: Arc<dyn TokenRegistry>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(config, provider, ledger, tokens, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: QueueConfig,
        provider: Arc<dyn PushProvider>,
        ledger: Arc<dyn LedgerStore>,
        tokens: Arc<dyn TokenRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let gateway = ProviderGateway::new(provider, config.provider_timeout)
            .with_token_registry(tokens.clone());
        let (metrics, metrics_rx) = metrics::channel();

        let state = WorkerState {
            store: Arc::new(JobStore::new()),
            ledger,
            tokens,
            gateway: Arc::new(gateway),
            retry: config.retry,
            chunk_size: config.provider_chunk_size,
            metrics,
            clock,
            wake: Arc::new(Notify::new()),
        };

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.worker_concurrency)),
            aggregator: Arc::new(RwLock::new(MetricsAggregator::new(config.metrics_window))),
            metrics_rx: Mutex::new(Some(metrics_rx)),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            metrics_cancel: CancellationToken::new(),
            dispatcher: Mutex::new(None),
            aggregator_task: Mutex::new(None),
            started: AtomicBool::new(false),
            config,
            state,
        })
    }

    /// Spawn the dispatcher and metrics aggregator. Must be called from
    /// within a Tokio runtime. Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(rx) = self.metrics_rx.lock().take() {
            *self.aggregator_task.lock() = Some(tokio::spawn(metrics::run_aggregator(
                rx,
                self.aggregator.clone(),
                self.metrics_cancel.clone(),
            )));
        }

        let dispatcher = self.build_dispatcher();
        *self.dispatcher.lock() = Some(tokio::spawn(dispatcher.run()));
        info!(concurrency = self.config.worker_concurrency, "queue: started");
    }

    fn build_dispatcher(&self) -> Dispatcher {
        Dispatcher {
            state: self.state.clone(),
            permits: self.permits.clone(),
            poll_interval: self.config.poll_interval,
            retention: self.config.job_retention,
            purge_interval: PURGE_INTERVAL,
            tracker: self.tracker.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Stop claiming new jobs and wait for in-flight attempts to finish.
    pub async fn shutdown(&self) {
        info!("queue: shutting down");
        self.cancel.cancel();
        self.tracker.close();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(task) = dispatcher {
            if let Err(err) = task.await {
                error!(error = %err, "queue: dispatcher task panicked");
            }
        }
        self.tracker.wait().await;

        // Workers are done, so every lifecycle event is already queued.
        self.metrics_cancel.cancel();
        let aggregator = self.aggregator_task.lock().take();
        if let Some(task) = aggregator {
            if let Err(err) = task.await {
                error!(error = %err, "queue: metrics task panicked");
            }
        }
        info!("queue: stopped");
    }

    pub async fn add_job(
        &self,
        target: Target,
        payload: Payload,
        options: JobOptions,
    ) -> Result<Admission, SubmitError> {
        validate_payload(&payload)?;
        validate_target(&target)?;
        let max_retries = options.max_retries.unwrap_or(self.config.default_max_retries);
        validate_max_retries(max_retries)?;

        let target = match target {
            Target::Tokens(tokens) => Target::Tokens(dedupe(tokens)),
            other => other,
        };
        let now = self.state.clock.now();

        let entry = NewLedgerEntry {
            title: payload.title.clone(),
            body: payload.body.clone(),
            delivery_type: DeliveryType::for_target(&target),
            total_targets: target.logical_count(),
            idempotency_key: idempotency_key(
                options.source_controller.as_deref(),
                options.source_action.as_deref(),
                options.force,
                DeliveryType::for_target(&target),
                &target,
            ),
            target_user_id: match &target {
                Target::User(user_id) => Some(user_id.clone()),
                _ => None,
            },
            target_topic: match &target {
                Target::Topic(topic) => Some(topic.clone()),
                _ => None,
            },
            source_controller: options.source_controller,
            source_action: options.source_action,
        };
        let (entry, created) = self
            .state
            .ledger
            .find_or_create(entry, self.window_start(now))
            .await?;

        if !created {
            info!(ledger_entry_id = %entry.id, "queue: duplicate submission suppressed");
            let job_id = self.state.store.jobs_for_ledger(&entry.id).into_iter().next();
            return Ok(Admission::Duplicate {
                ledger_entry_id: entry.id,
                job_id,
            });
        }

        let job = NotificationJob {
            id: new_job_id(),
            job_type: target.job_type(),
            remaining: target.recipients(),
            target,
            payload,
            priority: options.priority,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries,
            created_at: now,
            scheduled_at: options.scheduled_at,
            started_at: None,
            finished_at: None,
            batch_id: None,
            ledger_entry_id: entry.id.clone(),
            chunk_delay_ms: self.config.default_batch_delay.as_millis() as u64,
            delivered: 0,
            last_error: None,
            provider_message_id: None,
        };
        let job_id = job.id.clone();
        info!(
            job_id = %job_id,
            ledger_entry_id = %entry.id,
            job_type = %job.job_type,
            priority = ?job.priority,
            "queue: job admitted"
        );
        self.state.metrics.record(LifecycleEvent::Admitted);

        if let Some(job) = self.try_fast_path(job, now) {
            self.state.store.insert(job, now);
            self.state.wake.notify_one();
        }

        Ok(Admission::Queued {
            job_id,
            ledger_entry_id: entry.id,
        })
    }

    /// Split a token list into jobs of at most `batch_size` recipients that
    /// share one batch id and one `BULK` ledger entry.
    pub async fn add_batch_jobs(
        &self,
        job_type: JobType,
        targets: Vec<String>,
        payload: Payload,
        options: BatchOptions,
    ) -> Result<BatchAdmission, SubmitError> {
        if job_type != JobType::TokenList {
            return Err(ValidationError::NotBatchable(job_type).into());
        }
        let batch_size = options.batch_size.unwrap_or(self.config.default_batch_size);
        if batch_size == 0 {
            return Err(ValidationError::ZeroBatchSize.into());
        }
        validate_payload(&payload)?;
        let target = Target::Tokens(dedupe(targets));
        validate_target(&target)?;
        let max_retries = options.max_retries.unwrap_or(self.config.default_max_retries);
        validate_max_retries(max_retries)?;

        let now = self.state.clock.now();
        let delay = options
            .batch_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_batch_delay);
        let chunk_count = (target.logical_count() as usize).div_ceil(batch_size);
        let schedule = batch_schedule(now, options.scheduled_at, delay, chunk_count)?;

        let entry = NewLedgerEntry {
            title: payload.title.clone(),
            body: payload.body.clone(),
            delivery_type: DeliveryType::Bulk,
            total_targets: target.logical_count(),
            idempotency_key: idempotency_key(
                options.source_controller.as_deref(),
                options.source_action.as_deref(),
                options.force,
                DeliveryType::Bulk,
                &target,
            ),
            target_user_id: None,
            target_topic: None,
            source_controller: options.source_controller,
            source_action: options.source_action,
        };
        let (entry, created) = self
            .state
            .ledger
            .find_or_create(entry, self.window_start(now))
            .await?;

        if !created {
            info!(ledger_entry_id = %entry.id, "queue: duplicate batch suppressed");
            let job_ids = self.state.store.jobs_for_ledger(&entry.id);
            let batch_id = job_ids
                .first()
                .and_then(|id| self.state.store.get(id))
                .and_then(|job| job.batch_id);
            return Ok(BatchAdmission {
                batch_id,
                job_ids,
                ledger_entry_id: entry.id,
                duplicate: true,
            });
        }

        let Target::Tokens(tokens) = target else {
            return Err(ValidationError::NotBatchable(job_type).into());
        };
        let batch_id = new_batch_id();

        let mut job_ids = Vec::new();
        let chunks = split_targets(&tokens, batch_size);
        for (chunk, scheduled_at) in chunks.into_iter().zip(schedule) {
            let job = NotificationJob {
                id: new_job_id(),
                job_type,
                target: Target::Tokens(chunk.clone()),
                remaining: chunk,
                payload: payload.clone(),
                priority: options.priority,
                status: JobStatus::Pending,
                retry_count: 0,
                max_retries,
                created_at: now,
                scheduled_at,
                started_at: None,
                finished_at: None,
                batch_id: Some(batch_id.clone()),
                ledger_entry_id: entry.id.clone(),
                chunk_delay_ms: delay.as_millis() as u64,
                delivered: 0,
                last_error: None,
                provider_message_id: None,
            };
            job_ids.push(job.id.clone());
            self.state.store.insert(job, now);
            self.state.metrics.record(LifecycleEvent::Admitted);
        }
        self.state.wake.notify_one();

        info!(
            batch_id = %batch_id,
            ledger_entry_id = %entry.id,
            jobs = job_ids.len(),
            recipients = tokens.len(),
            "queue: batch admitted"
        );
        Ok(BatchAdmission {
            batch_id: Some(batch_id),
            job_ids,
            ledger_entry_id: entry.id,
            duplicate: false,
        })
    }

    pub fn job_status(&self, job_id: &str) -> Option<NotificationJob> {
        self.state.store.get(job_id)
    }

    pub fn batch_status(&self, batch_id: &str) -> Option<BatchStatus> {
        self.state.store.batch_status(batch_id)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let counts = self.state.store.counts();
        let stats = self.aggregator.read().stats(Instant::now());
        MetricsSnapshot {
            total_jobs: counts.total,
            pending_jobs: counts.pending,
            processing_jobs: counts.processing,
            completed_jobs: counts.completed,
            failed_jobs: counts.failed,
            cancelled_jobs: counts.cancelled,
            retried_jobs: stats.retried,
            ledger_errors: stats.ledger_errors,
            average_processing_time_ms: stats.average_processing_time_ms,
            throughput_per_minute: stats.throughput_per_minute,
        }
    }

    /// Cancel a pending job. Its outstanding recipients are recorded as
    /// failures so the ledger entry still finalizes.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), CancelError> {
        let job = self.state.store.cancel(job_id, self.state.clock.now())?;
        account(&self.state, &job, 0, job.remaining.len()).await;
        self.state.metrics.record(LifecycleEvent::Cancelled);
        info!(
            job_id = %job.id,
            ledger_entry_id = %job.ledger_entry_id,
            "queue: job cancelled"
        );
        Ok(())
    }

    pub async fn ledger_entry(&self, id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        self.state.ledger.get(id).await
    }

    pub async fn recent_ledger_entries(&self, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        self.state.ledger.list_recent(limit).await
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.idempotency_window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Hand an immediate single-recipient job straight to a free worker.
    /// Gives the job back when it has to go through the dispatcher.
    fn try_fast_path(&self, job: NotificationJob, now: DateTime<Utc>) -> Option<NotificationJob> {
        if !self.config.fast_path
            || !self.started.load(Ordering::SeqCst)
            || self.cancel.is_cancelled()
            || !job.is_due(now)
            || job.remaining.len() != 1
        {
            return Some(job);
        }
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            return Some(job);
        };

        let mut job = job;
        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        self.state.store.insert_claimed(job.clone());
        debug!(job_id = %job.id, "queue: fast path dispatch");

        let state = self.state.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            handle_delivery_job(&state, job).await;
        });
        None
    }
}

/// Key used to suppress repeated sends of one business event. Only set when
/// the caller identified the event and did not force a resend.
///
/// Batches get their own key space so a batch never collides with a single
/// job sent to the same tokens.
fn idempotency_key(
    controller: Option<&str>,
    action: Option<&str>,
    force: bool,
    delivery_type: DeliveryType,
    target: &Target,
) -> Option<String> {
    let scope = match delivery_type {
        DeliveryType::Bulk => "bulk:",
        DeliveryType::Token | DeliveryType::User | DeliveryType::Topic => "",
    };
    match (controller, action) {
        (Some(controller), Some(action)) if !force => Some(format!(
            "{}:{}:{}{}",
            controller,
            action,
            scope,
            target.idempotency_key()
        )),
        _ => None,
    }
}

/// Due time of each batch job: job k starts `k × delay` after the batch
/// start. The first job is immediate unless the batch has a start time.
fn batch_schedule(
    now: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    delay: Duration,
    count: usize,
) -> Result<Vec<Option<DateTime<Utc>>>, ValidationError> {
    (0..count)
        .map(|index| {
            if index == 0 && start.is_none() {
                return Ok(None);
            }
            u32::try_from(index)
                .ok()
                .and_then(|k| delay.checked_mul(k))
                .and_then(|offset| chrono::Duration::from_std(offset).ok())
                .and_then(|offset| start.unwrap_or(now).checked_add_signed(offset))
                .map(Some)
                .ok_or(ValidationError::ScheduleOverflow)
        })
        .collect()
}

fn dedupe(tokens: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tokens.len());
    tokens
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}
