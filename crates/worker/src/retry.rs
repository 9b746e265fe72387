use courier_core::types::{ErrorKind, NotificationJob, RecipientResult};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_count`: `base * 2^(n-1)`, capped.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry_count - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn decide(&self, job: &NotificationJob, outcome: &AttemptOutcome) -> RetryDecision {
        if let Some(first) = outcome.retryable.first() {
            let kind = first.error_kind.unwrap_or(ErrorKind::Unknown);
            if job.retry_count < job.max_retries {
                let retry_count = job.retry_count + 1;
                return RetryDecision::Retry {
                    remaining: outcome.retryable_recipients(),
                    delay: self.backoff(retry_count),
                    reason: kind,
                };
            }
            return RetryDecision::Fail {
                reason: format!("retries exhausted: {}", kind),
            };
        }

        if job.delivered as usize + outcome.delivered.len() > 0 {
            RetryDecision::Complete
        } else {
            RetryDecision::Fail {
                reason: "no recipient could be reached".to_string(),
            }
        }
    }
}

/// Recipients settled by one attempt, split by how they settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub delivered: Vec<String>,
    /// Permanent failures. Never retried.
    pub invalid: Vec<String>,
    pub retryable: Vec<RecipientResult>,
    pub message_id: Option<String>,
}

impl AttemptOutcome {
    pub fn from_results(results: Vec<RecipientResult>) -> Self {
        let mut outcome = AttemptOutcome::default();
        for result in results {
            if result.ok {
                outcome.delivered.push(result.recipient);
            } else if result.is_retryable_failure() {
                outcome.retryable.push(result);
            } else {
                outcome.invalid.push(result.recipient);
            }
        }
        outcome
    }

    pub fn retryable_recipients(&self) -> Vec<String> {
        self.retryable.iter().map(|r| r.recipient.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        remaining: Vec<String>,
        delay: Duration,
        reason: ErrorKind,
    },
    Complete,
    Fail { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_core::types::{JobStatus, JobType, Payload, Priority, Target};

    fn job(retry_count: u32, max_retries: u32, delivered: u32) -> NotificationJob {
        let target = Target::Tokens(vec!["t1".into(), "t2".into()]);
        NotificationJob {
            id: "job_test".into(),
            job_type: JobType::TokenList,
            remaining: target.recipients(),
            target,
            payload: Payload::new("Hi", "There"),
            priority: Priority::Normal,
            status: JobStatus::Processing,
            retry_count,
            max_retries,
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            finished_at: None,
            batch_id: None,
            ledger_entry_id: "ntf_test".into(),
            chunk_delay_ms: 0,
            delivered,
            last_error: None,
            provider_message_id: None,
        }
    }

    #[test]
    fn test_backoff_no_delay_before_first_retry() {
        assert_eq!(RetryPolicy::default().backoff(0), Duration::ZERO);
    }

    #[test]
    fn test_backoff_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(6), Duration::from_secs(32));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(7), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_outcome_splits_results() {
        let outcome = AttemptOutcome::from_results(vec![
            RecipientResult::success("t1"),
            RecipientResult::failure("t2", ErrorKind::InvalidToken),
            RecipientResult::failure("t3", ErrorKind::RateLimited),
        ]);
        assert_eq!(outcome.delivered, vec!["t1".to_string()]);
        assert_eq!(outcome.invalid, vec!["t2".to_string()]);
        assert_eq!(outcome.retryable_recipients(), vec!["t3".to_string()]);
    }

    #[test]
    fn test_retry_narrows_to_retryable_recipients() {
        let outcome = AttemptOutcome::from_results(vec![
            RecipientResult::success("t1"),
            RecipientResult::failure("t2", ErrorKind::ProviderUnavailable),
        ]);
        let decision = RetryPolicy::default().decide(&job(0, 3, 0), &outcome);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                remaining: vec!["t2".into()],
                delay: Duration::from_secs(1),
                reason: ErrorKind::ProviderUnavailable,
            }
        );
    }

    #[test]
    fn test_exhausted_retries_fail() {
        let outcome = AttemptOutcome::from_results(vec![RecipientResult::failure(
            "t1",
            ErrorKind::RateLimited,
        )]);
        let decision = RetryPolicy::default().decide(&job(3, 3, 0), &outcome);
        assert!(matches!(decision, RetryDecision::Fail { .. }));
    }

    #[test]
    fn test_permanent_failures_complete_when_something_delivered() {
        let outcome = AttemptOutcome::from_results(vec![
            RecipientResult::success("t1"),
            RecipientResult::failure("t2", ErrorKind::InvalidToken),
        ]);
        assert_eq!(
            RetryPolicy::default().decide(&job(0, 3, 0), &outcome),
            RetryDecision::Complete
        );
    }

    #[test]
    fn test_earlier_deliveries_count_towards_completion() {
        let outcome = AttemptOutcome::from_results(vec![RecipientResult::failure(
            "t2",
            ErrorKind::InvalidToken,
        )]);
        assert_eq!(
            RetryPolicy::default().decide(&job(1, 3, 1), &outcome),
            RetryDecision::Complete
        );
    }

    #[test]
    fn test_all_permanent_failures_fail() {
        let outcome = AttemptOutcome::from_results(vec![
            RecipientResult::failure("t1", ErrorKind::InvalidToken),
            RecipientResult::failure("t2", ErrorKind::InvalidToken),
        ]);
        assert!(matches!(
            RetryPolicy::default().decide(&job(0, 3, 0), &outcome),
            RetryDecision::Fail { .. }
        ));
    }
}
