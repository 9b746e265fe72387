use courier_core::types::{
    ErrorKind, JobStatus, LedgerStatus, NotificationJob, RecipientResult, Target, TopicResult,
};
use courier_db::StoreError;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::metrics::LifecycleEvent;
use crate::retry::{AttemptOutcome, RetryDecision};
use crate::splitter::BatchSplitter;
use crate::state::WorkerState;

/// Run one delivery attempt for a claimed job and write the result back.
///
/// Ledger counts are settled before the job's new state becomes visible in
/// the store, so a terminal job always has its ledger entry up to date.
pub async fn handle_delivery_job(state: &WorkerState, job: NotificationJob) {
    let started = Instant::now();
    info!(
        job_id = %job.id,
        ledger_entry_id = %job.ledger_entry_id,
        job_type = %job.job_type,
        attempt = job.retry_count + 1,
        recipients = job.remaining.len(),
        "delivery: attempt starting"
    );
    state.metrics.record(LifecycleEvent::Started);

    // A sibling job waiting on a retry keeps the entry in RETRY.
    if !state.store.has_pending_retry(&job.ledger_entry_id, &job.id) {
        if let Err(err) = state
            .ledger
            .mark_status(&job.ledger_entry_id, LedgerStatus::Sending)
            .await
        {
            ledger_error(state, &job, "mark_sending", &err);
        }
    }

    let outcome = attempt_delivery(state, &job).await;
    let decision = state.retry.decide(&job, &outcome);
    settle(state, job, outcome, decision, started.elapsed()).await;
}

async fn attempt_delivery(state: &WorkerState, job: &NotificationJob) -> AttemptOutcome {
    let splitter = BatchSplitter::new(state.chunk_size, Duration::from_millis(job.chunk_delay_ms));

    match &job.target {
        Target::Topic(topic) => {
            let result = state.gateway.send_topic(topic, &job.payload).await;
            topic_outcome(topic, result)
        }
        Target::Tokens(_) => {
            let results = splitter
                .send_all(&state.gateway, &job.remaining, &job.payload)
                .await;
            AttemptOutcome::from_results(results)
        }
        Target::User(user_id) => {
            let tokens = match state.tokens.resolve_user_tokens(user_id).await {
                Ok(tokens) => tokens,
                Err(err) => {
                    warn!(
                        job_id = %job.id,
                        user_id = %user_id,
                        error = %err,
                        "delivery: token lookup failed"
                    );
                    return AttemptOutcome::from_results(vec![RecipientResult::failure(
                        user_id.clone(),
                        ErrorKind::Unknown,
                    )]);
                }
            };
            if tokens.is_empty() {
                info!(job_id = %job.id, user_id = %user_id, "delivery: user has no registered devices");
                return AttemptOutcome {
                    invalid: vec![user_id.clone()],
                    ..AttemptOutcome::default()
                };
            }
            let results = splitter.send_all(&state.gateway, &tokens, &job.payload).await;
            user_outcome(user_id, &results)
        }
    }
}

/// A user is reached when any of their devices accepted the message.
fn user_outcome(user_id: &str, results: &[RecipientResult]) -> AttemptOutcome {
    if results.iter().any(|r| r.ok) {
        return AttemptOutcome {
            delivered: vec![user_id.to_string()],
            ..AttemptOutcome::default()
        };
    }
    match results.iter().find(|r| r.is_retryable_failure()) {
        Some(failed) => AttemptOutcome {
            retryable: vec![RecipientResult::failure(
                user_id,
                failed.error_kind.unwrap_or(ErrorKind::Unknown),
            )],
            ..AttemptOutcome::default()
        },
        None => AttemptOutcome {
            invalid: vec![user_id.to_string()],
            ..AttemptOutcome::default()
        },
    }
}

fn topic_outcome(topic: &str, result: TopicResult) -> AttemptOutcome {
    if result.ok {
        return AttemptOutcome {
            delivered: vec![topic.to_string()],
            message_id: result.message_id,
            ..AttemptOutcome::default()
        };
    }
    AttemptOutcome::from_results(vec![RecipientResult::failure(
        topic,
        result.error_kind.unwrap_or(ErrorKind::Unknown),
    )])
}

async fn settle(
    state: &WorkerState,
    mut job: NotificationJob,
    outcome: AttemptOutcome,
    decision: RetryDecision,
    elapsed: Duration,
) {
    let now = state.clock.now();
    let delivered = outcome.delivered.len();
    let invalid = outcome.invalid.len();
    job.delivered += delivered as u32;
    if outcome.message_id.is_some() {
        job.provider_message_id = outcome.message_id;
    }

    match decision {
        RetryDecision::Retry {
            remaining,
            delay,
            reason,
        } => {
            account(state, &job, delivered, invalid).await;
            if let Err(err) = state
                .ledger
                .mark_status(&job.ledger_entry_id, LedgerStatus::Retry)
                .await
            {
                ledger_error(state, &job, "mark_retry", &err);
            }

            job.retry_count += 1;
            job.remaining = remaining;
            job.status = JobStatus::Pending;
            let delay_chrono =
                chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            job.scheduled_at = Some(now + delay_chrono);
            job.last_error = Some(reason.to_string());
            warn!(
                job_id = %job.id,
                ledger_entry_id = %job.ledger_entry_id,
                retry = job.retry_count,
                max_retries = job.max_retries,
                delay_ms = delay.as_millis() as u64,
                remaining = job.remaining.len(),
                reason = %reason,
                "delivery: scheduling retry"
            );

            let job_id = job.id.clone();
            if let Err(err) = state.store.requeue(job, now) {
                error!(job_id = %job_id, error = %err, "delivery: requeue failed");
            }
            state.wake.notify_one();
            state.metrics.record(LifecycleEvent::Retried { elapsed });
        }
        RetryDecision::Complete => {
            account(state, &job, delivered, invalid).await;

            job.status = JobStatus::Completed;
            job.remaining.clear();
            job.finished_at = Some(now);
            info!(
                job_id = %job.id,
                ledger_entry_id = %job.ledger_entry_id,
                delivered = job.delivered,
                elapsed_ms = elapsed.as_millis() as u64,
                "delivery: job completed"
            );
            finish(state, job);
            state.metrics.record(LifecycleEvent::Completed { elapsed });
        }
        RetryDecision::Fail { reason } => {
            account(state, &job, delivered, invalid + outcome.retryable.len()).await;

            job.status = JobStatus::Failed;
            job.remaining.clear();
            job.finished_at = Some(now);
            warn!(
                job_id = %job.id,
                ledger_entry_id = %job.ledger_entry_id,
                attempts = job.retry_count + 1,
                reason = %reason,
                "delivery: job failed"
            );
            job.last_error = Some(reason);
            finish(state, job);
            state.metrics.record(LifecycleEvent::Failed { elapsed });
        }
    }
}

fn finish(state: &WorkerState, job: NotificationJob) {
    let job_id = job.id.clone();
    if let Err(err) = state.store.finish(job) {
        error!(job_id = %job_id, error = %err, "delivery: failed to record final state");
    }
}

/// Report settled recipients to the ledger.
pub(crate) async fn account(
    state: &WorkerState,
    job: &NotificationJob,
    success: usize,
    failure: usize,
) {
    if success + failure == 0 {
        return;
    }
    match state
        .ledger
        .increment_counts(&job.ledger_entry_id, success as u32, failure as u32)
        .await
    {
        Ok(entry) if entry.is_finalized() => info!(
            ledger_entry_id = %entry.id,
            status = ?entry.status,
            success = entry.success_count,
            failure = entry.failure_count,
            total = entry.total_targets,
            "delivery: ledger entry finalized"
        ),
        Ok(_) => {}
        Err(err) => ledger_error(state, job, "increment_counts", &err),
    }
}

fn ledger_error(state: &WorkerState, job: &NotificationJob, op: &'static str, err: &StoreError) {
    error!(
        job_id = %job.id,
        ledger_entry_id = %job.ledger_entry_id,
        op,
        error = %err,
        "delivery: ledger update failed"
    );
    state.metrics.record(LifecycleEvent::LedgerError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_reached_when_any_device_accepts() {
        let outcome = user_outcome(
            "user-1",
            &[
                RecipientResult::failure("a", ErrorKind::InvalidToken),
                RecipientResult::success("b"),
            ],
        );
        assert_eq!(outcome.delivered, vec!["user-1".to_string()]);
        assert!(outcome.retryable.is_empty());
    }

    #[test]
    fn test_user_retryable_when_devices_failed_transiently() {
        let outcome = user_outcome(
            "user-1",
            &[
                RecipientResult::failure("a", ErrorKind::InvalidToken),
                RecipientResult::failure("b", ErrorKind::RateLimited),
            ],
        );
        assert_eq!(
            outcome.retryable,
            vec![RecipientResult::failure("user-1", ErrorKind::RateLimited)]
        );
    }

    #[test]
    fn test_user_invalid_when_every_device_invalid() {
        let outcome = user_outcome(
            "user-1",
            &[RecipientResult::failure("a", ErrorKind::InvalidToken)],
        );
        assert_eq!(outcome.invalid, vec!["user-1".to_string()]);
    }

    #[test]
    fn test_topic_outcome() {
        let ok = topic_outcome(
            "news",
            TopicResult {
                ok: true,
                error_kind: None,
                message_id: Some("msg-1".into()),
            },
        );
        assert_eq!(ok.delivered, vec!["news".to_string()]);
        assert_eq!(ok.message_id.as_deref(), Some("msg-1"));

        let unavailable = topic_outcome(
            "news",
            TopicResult {
                ok: false,
                error_kind: Some(ErrorKind::ProviderUnavailable),
                message_id: None,
            },
        );
        assert_eq!(unavailable.retryable.len(), 1);
    }
}
