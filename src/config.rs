//! Queue and processor configuration, loadable from the environment or built
//! directly for tests.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use typed_builder::TypedBuilder;

/// Runtime configuration for the queue and its worker-pool processor.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct QueueConfig {
    /// Key namespace prefix for all Redis keys owned by this queue.
    #[builder(default = "queue".to_string())]
    pub queue_prefix: String,

    /// Number of concurrent worker tasks spawned by `Processor::start`.
    #[builder(default = 4)]
    pub num_workers: usize,

    /// Idle sleep when `dequeue` returns nothing.
    #[builder(default = Duration::from_millis(100))]
    pub poll_interval: Duration,

    /// Max time `Processor::stop` waits for workers to drain in-flight jobs.
    #[builder(default = Duration::from_secs(30))]
    pub shutdown_wait: Duration,

    /// Default `max_retries` for jobs that don't specify one.
    #[builder(default = 3)]
    pub default_max_retries: u32,

    /// TTL applied to a job's hash body. Must exceed `max_job_age`.
    #[builder(default = Duration::from_secs(7 * 24 * 3600))]
    pub default_ttl: Duration,

    /// Jobs with a larger payload are rejected at `enqueue`.
    #[builder(default = 1024 * 1024)]
    pub max_payload_size: usize,

    /// Base backoff delay for the first retry.
    #[builder(default = Duration::from_millis(500))]
    pub retry_delay: Duration,

    /// Backoff delay cap.
    #[builder(default = Duration::from_secs(3600))]
    pub max_retry_delay: Duration,

    /// Backoff multiplier. Fixed at 2 for the reference behavior; kept as a
    /// parameter for extension.
    #[builder(default = 2.0)]
    pub retry_multiplier: f64,

    /// Apply +/-10% jitter to computed backoff delays.
    #[builder(default = false)]
    pub jitter: bool,

    /// How often an external sweeper should scan for orphaned jobs.
    #[builder(default = Duration::from_secs(60))]
    pub cleanup_interval: Duration,

    /// Age after which a `processing` job is considered orphaned by the
    /// external sweeper.
    #[builder(default = Duration::from_secs(300))]
    pub max_job_age: Duration,

    /// Connection string for the Redis-backed `Kv` adapter.
    #[builder(default = "redis://localhost:6379".to_string())]
    pub redis_url: String,
}

impl QueueConfig {
    /// Load configuration from environment variables, falling back to
    /// sensible defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = QueueConfig::builder();

        if let Ok(v) = env::var("QUEUE_PREFIX") {
            builder = builder.queue_prefix(v);
        }
        let config = builder.build();

        let num_workers = parse_env_or("QUEUE_NUM_WORKERS", config.num_workers)?;
        let poll_interval = parse_ms_env_or("QUEUE_POLL_INTERVAL_MS", config.poll_interval)?;
        let shutdown_wait = parse_ms_env_or("QUEUE_SHUTDOWN_WAIT_MS", config.shutdown_wait)?;
        let default_max_retries =
            parse_env_or("QUEUE_DEFAULT_MAX_RETRIES", config.default_max_retries)?;
        let default_ttl = parse_secs_env_or("QUEUE_DEFAULT_TTL_SECS", config.default_ttl)?;
        let max_payload_size = parse_env_or("QUEUE_MAX_PAYLOAD_SIZE", config.max_payload_size)?;
        let retry_delay = parse_ms_env_or("QUEUE_RETRY_DELAY_MS", config.retry_delay)?;
        let max_retry_delay = parse_ms_env_or("QUEUE_MAX_RETRY_DELAY_MS", config.max_retry_delay)?;
        let retry_multiplier = parse_env_or("QUEUE_RETRY_MULTIPLIER", config.retry_multiplier)?;
        let jitter = parse_env_or("QUEUE_RETRY_JITTER", config.jitter)?;
        let cleanup_interval =
            parse_ms_env_or("QUEUE_CLEANUP_INTERVAL_MS", config.cleanup_interval)?;
        let max_job_age = parse_secs_env_or("QUEUE_MAX_JOB_AGE_SECS", config.max_job_age)?;
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        Ok(Self {
            num_workers,
            poll_interval,
            shutdown_wait,
            default_max_retries,
            default_ttl,
            max_payload_size,
            retry_delay,
            max_retry_delay,
            retry_multiplier,
            jitter,
            cleanup_interval,
            max_job_age,
            redis_url,
            ..config
        })
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be valid: {e}"))
            .context(format!("parsing {key}")),
        Err(_) => Ok(default),
    }
}

fn parse_ms_env_or(key: &str, default: Duration) -> Result<Duration> {
    match env::var(key) {
        Ok(raw) => {
            let ms: u64 = raw.parse().context(format!("parsing {key}"))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(default),
    }
}

fn parse_secs_env_or(key: &str, default: Duration) -> Result<Duration> {
    match env::var(key) {
        Ok(raw) => {
            let secs: u64 = raw.parse().context(format!("parsing {key}"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}
