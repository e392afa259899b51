use std::env;

/// Application configuration parsed from environment variables (§6
/// configuration surface).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    /// Max OCC attempts inside one pipeline run (C4).
    pub max_retries: u32,
    /// Base for linear OCC backoff, in milliseconds (C4).
    pub retry_interval_ms: u64,
    /// Scheduler wake-up cadence, in milliseconds (C6).
    pub poll_interval_ms: u64,
    /// First scheduled retry delay after a non-OCC failure, in seconds (C6).
    pub base_retry_delay_secs: u64,
    /// Cap on scheduled retry delay, in seconds (C6).
    pub max_retry_delay_secs: u64,
    /// Prefix used to derive `processor_id`.
    pub processor_name: String,
    /// Max duration an item may sit in `processing` before the scheduler
    /// forces it back to `pending` (§5 stuck-item recovery).
    pub stuck_threshold_secs: u64,
    /// Bounded concurrency for the worker dispatch pool (§5, §9).
    pub worker_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8090".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let max_retries = env_parse("MAX_RETRIES", 5)?;
        let retry_interval_ms = env_parse("RETRY_INTERVAL_MS", 200)?;
        let poll_interval_ms = env_parse("POLL_INTERVAL_MS", 5000)?;
        let base_retry_delay_secs = env_parse("BASE_RETRY_DELAY_SECS", 30)?;
        let max_retry_delay_secs = env_parse("MAX_RETRY_DELAY_SECS", 3600)?;
        let processor_name = env::var("PROCESSOR_NAME").unwrap_or_else(|_| "event_queue".to_string());
        let worker_concurrency = env_parse("WORKER_CONCURRENCY", 8)?;

        // Default per §5: max_retries * retry_interval + grace.
        let derived_stuck_threshold = (max_retries as u64 * retry_interval_ms) / 1000 + 30;
        let stuck_threshold_secs = env_parse("STUCK_THRESHOLD_SECS", derived_stuck_threshold)?;

        Ok(Config {
            database_url,
            host,
            port,
            max_retries,
            retry_interval_ms,
            poll_interval_ms,
            base_retry_delay_secs,
            max_retry_delay_secs,
            processor_name,
            stuck_threshold_secs,
            worker_concurrency,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|_| format!("{key} must be a valid value")),
        Err(_) => Ok(default),
    }
}
