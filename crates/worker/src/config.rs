use courier_core::config::Settings;
use courier_core::validate::MAX_RETRY_CEILING;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub worker_concurrency: usize,
    pub default_max_retries: u32,
    pub default_batch_size: usize,
    pub default_batch_delay: Duration,
    pub provider_chunk_size: usize,
    pub provider_timeout: Duration,
    pub idempotency_window: Duration,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub job_retention: Duration,
    pub metrics_window: Duration,
    /// Dispatch immediate single-recipient jobs without waiting for the
    /// dispatcher when a worker slot is free.
    pub fast_path: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            default_max_retries: 3,
            default_batch_size: 100,
            default_batch_delay: Duration::from_millis(1000),
            provider_chunk_size: 500,
            provider_timeout: Duration::from_secs(10),
            idempotency_window: Duration::from_secs(86_400),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(250),
            job_retention: Duration::from_secs(3600),
            metrics_window: Duration::from_secs(300),
            fast_path: true,
        }
    }
}

impl QueueConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            worker_concurrency: settings.worker_concurrency,
            default_max_retries: settings.max_retries,
            default_batch_size: settings.batch_size,
            default_batch_delay: Duration::from_millis(settings.batch_delay_ms),
            provider_chunk_size: settings.provider_chunk_size,
            provider_timeout: Duration::from_millis(settings.provider_timeout_ms),
            idempotency_window: Duration::from_secs(settings.idempotency_window_secs),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(settings.retry_base_delay_ms),
                max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            },
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            job_retention: Duration::from_secs(settings.job_retention_secs),
            metrics_window: Duration::from_secs(settings.metrics_window_secs),
            fast_path: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.provider_chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.default_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.default_max_retries > MAX_RETRY_CEILING {
            return Err(ConfigError::RetryCeiling {
                requested: self.default_max_retries,
                limit: MAX_RETRY_CEILING,
            });
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::InvertedBackoff);
        }
        Ok(())
    }
}
