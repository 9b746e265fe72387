use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: Option<String>,
    pub courier_env: String,
    pub api_bind: String,
    pub worker_concurrency: usize,
    pub max_retries: u32,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub provider_chunk_size: usize,
    pub provider_timeout_ms: u64,
    pub idempotency_window_secs: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub job_retention_secs: u64,
    pub metrics_window_secs: u64,
    pub provider_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub signing_secret: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let database_url = lookup("COURIER_DATABASE_URL").or_else(|| lookup("DATABASE_URL"));
        let courier_env = lookup("COURIER_ENV").unwrap_or_else(|| "dev".to_string());
        let api_bind = lookup("COURIER_API_BIND").unwrap_or_else(|| "0.0.0.0:3000".to_string());

        Self {
            database_url,
            courier_env,
            api_bind,
            worker_concurrency: parse_or(&lookup, "COURIER_WORKER_CONCURRENCY", 4),
            max_retries: parse_or(&lookup, "COURIER_MAX_RETRIES", 3),
            batch_size: parse_or(&lookup, "COURIER_BATCH_SIZE", 100),
            batch_delay_ms: parse_or(&lookup, "COURIER_BATCH_DELAY_MS", 1000),
            provider_chunk_size: parse_or(&lookup, "COURIER_PROVIDER_CHUNK_SIZE", 500),
            provider_timeout_ms: parse_or(&lookup, "COURIER_PROVIDER_TIMEOUT_MS", 10_000),
            idempotency_window_secs: parse_or(&lookup, "COURIER_IDEMPOTENCY_WINDOW_SECS", 86_400),
            retry_base_delay_ms: parse_or(&lookup, "COURIER_RETRY_BASE_DELAY_MS", 1000),
            retry_max_delay_ms: parse_or(&lookup, "COURIER_RETRY_MAX_DELAY_MS", 60_000),
            poll_interval_ms: parse_or(&lookup, "COURIER_POLL_INTERVAL_MS", 250),
            job_retention_secs: parse_or(&lookup, "COURIER_JOB_RETENTION_SECS", 3600),
            metrics_window_secs: parse_or(&lookup, "COURIER_METRICS_WINDOW_SECS", 300),
            provider_url: lookup("COURIER_PROVIDER_URL"),
            provider_api_key: lookup("COURIER_PROVIDER_API_KEY"),
            signing_secret: lookup("COURIER_SIGNING_SECRET"),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]);
        assert!(settings.database_url.is_none());
        assert_eq!(settings.courier_env, "dev");
        assert_eq!(settings.api_bind, "0.0.0.0:3000");
        assert_eq!(settings.worker_concurrency, 4);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.batch_delay_ms, 1000);
        assert_eq!(settings.provider_timeout_ms, 10_000);
        assert_eq!(settings.idempotency_window_secs, 86_400);
    }

    #[test]
    fn test_overrides() {
        let settings = settings_from(&[
            ("COURIER_WORKER_CONCURRENCY", "16"),
            ("COURIER_MAX_RETRIES", "5"),
            ("COURIER_BATCH_SIZE", "250"),
            ("COURIER_PROVIDER_URL", "https://push.internal"),
        ]);
        assert_eq!(settings.worker_concurrency, 16);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.batch_size, 250);
        assert_eq!(settings.provider_url.as_deref(), Some("https://push.internal"));
    }

    #[test]
    fn test_database_url_fallback() {
        let settings = settings_from(&[("DATABASE_URL", "postgres://localhost/courier")]);
        assert_eq!(
            settings.database_url.as_deref(),
            Some("postgres://localhost/courier")
        );

        let settings = settings_from(&[
            ("DATABASE_URL", "postgres://fallback"),
            ("COURIER_DATABASE_URL", "postgres://primary"),
        ]);
        assert_eq!(settings.database_url.as_deref(), Some("postgres://primary"));
    }

    #[test]
    fn test_unparseable_numbers_fall_back() {
        let settings = settings_from(&[("COURIER_WORKER_CONCURRENCY", "lots")]);
        assert_eq!(settings.worker_concurrency, 4);
    }
}
