//! Dispatcher loop.
//!
//! Holds a worker permit before claiming, so at most `worker_concurrency`
//! attempts run at once and a claimed job never waits for a slot.

use courier_core::types::NotificationJob;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::jobs::delivery::handle_delivery_job;
use crate::state::WorkerState;

pub(crate) const PURGE_INTERVAL: Duration = Duration::from_secs(30);

pub struct Dispatcher {
    pub(crate) state: WorkerState,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) poll_interval: Duration,
    pub(crate) retention: Duration,
    pub(crate) purge_interval: Duration,
    pub(crate) tracker: TaskTracker,
    pub(crate) cancel: CancellationToken,
}

impl Dispatcher {
    pub async fn run(self) {
        info!(
            permits = self.permits.available_permits(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "dispatcher: starting"
        );
        let mut last_purge = Instant::now();

        loop {
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(job) = self.next_job(&mut last_purge).await else {
                break;
            };

            debug!(job_id = %job.id, priority = ?job.priority, "dispatcher: claimed job");
            let state = self.state.clone();
            self.tracker.spawn(async move {
                let _permit = permit;
                handle_delivery_job(&state, job).await;
            });
        }

        info!("dispatcher: stopped");
    }

    /// Wait until a job can be claimed. Returns `None` once cancelled.
    ///
    /// Purging is checked before every claim so a steady backlog cannot
    /// starve it.
    pub(crate) async fn next_job(&self, last_purge: &mut Instant) -> Option<NotificationJob> {
        loop {
            let now = self.state.clock.now();
            if last_purge.elapsed() >= self.purge_interval {
                self.purge(now);
                *last_purge = Instant::now();
            }

            if let Some(job) = self.state.store.claim_next(now) {
                return Some(job);
            }

            let wait = self
                .state
                .store
                .next_due()
                .and_then(|due| (due - now).to_std().ok())
                .map_or(self.poll_interval, |until| until.min(self.poll_interval));

            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = self.state.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn purge(&self, now: chrono::DateTime<chrono::Utc>) {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return;
        };
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return;
        };
        let purged = self.state.store.purge_terminal(cutoff);
        if purged > 0 {
            info!(purged, "dispatcher: purged finished jobs");
        }
    }
}
