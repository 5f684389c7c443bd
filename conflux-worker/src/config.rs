//! Worker configuration
//!
//! Defines all configurable parameters for the worker including queue
//! connection settings, concurrency, timeouts and the retry policy.

use std::time::Duration;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker instance
    pub worker_id: String,

    /// Redis URL backing the event bus and the work queue
    pub redis_url: String,

    /// Name of the work queue to consume
    pub queue_name: String,

    /// Max jobs executed concurrently
    pub max_parallel_jobs: usize,

    /// How long a single reserve call blocks waiting for a job
    pub poll_timeout: Duration,

    /// Maximum time a job can run before it is abandoned
    pub job_timeout: Duration,

    /// Delay before the first retry; doubles on each further attempt
    pub retry_base_delay: Duration,

    /// Upper bound of the retry delay
    pub retry_max_delay: Duration,

    /// Namespace handed to executors during migration
    pub table_prefix: String,

    /// How long one heartbeat keeps this worker's reserved jobs claimed
    pub lease_ttl: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, redis_url: String) -> Self {
        Self {
            worker_id,
            redis_url,
            queue_name: "conflux:jobs".to_string(),
            max_parallel_jobs: 4,
            poll_timeout: Duration::from_secs(5),
            job_timeout: Duration::from_secs(1800), // 30 minutes
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_millis(30_000),
            table_prefix: "_conflux_".to_string(),
            lease_ttl: conflux_broker::DEFAULT_LEASE,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - WORKER_ID (optional, default: random uuid)
    /// - REDIS_URL (optional, default: redis://127.0.0.1:6379)
    /// - QUEUE_NAME (optional, default: conflux:jobs)
    /// - MAX_PARALLEL_JOBS (optional, default: 4)
    /// - POLL_TIMEOUT (optional, seconds, default: 5)
    /// - JOB_TIMEOUT (optional, seconds, default: 1800)
    /// - RETRY_BASE_DELAY_MS (optional, default: 500)
    /// - RETRY_MAX_DELAY_MS (optional, default: 30000)
    /// - TABLE_PREFIX (optional, default: _conflux_)
    /// - WORKER_LEASE (optional, seconds, default: 30)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let worker_id = std::env::var("WORKER_ID").unwrap_or(defaults.worker_id);
        let redis_url = std::env::var("REDIS_URL").unwrap_or(defaults.redis_url);
        let queue_name = std::env::var("QUEUE_NAME").unwrap_or(defaults.queue_name);

        let max_parallel_jobs = std::env::var("MAX_PARALLEL_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_parallel_jobs);

        let poll_timeout = std::env::var("POLL_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_timeout);

        let job_timeout = std::env::var("JOB_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.job_timeout);

        let retry_base_delay = std::env::var("RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_base_delay);

        let retry_max_delay = std::env::var("RETRY_MAX_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_max_delay);

        let table_prefix = std::env::var("TABLE_PREFIX").unwrap_or(defaults.table_prefix);

        let lease_ttl = std::env::var("WORKER_LEASE")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.lease_ttl);

        Ok(Self {
            worker_id,
            redis_url,
            queue_name,
            max_parallel_jobs,
            poll_timeout,
            job_timeout,
            retry_base_delay,
            retry_max_delay,
            table_prefix,
            lease_ttl,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            anyhow::bail!("redis_url must start with redis:// or rediss://");
        }

        if self.queue_name.is_empty() {
            anyhow::bail!("queue_name cannot be empty");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.poll_timeout.as_secs() == 0 {
            anyhow::bail!("poll_timeout must be at least one second");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        // renewed every third of the lease
        if self.lease_ttl < Duration::from_secs(3) {
            anyhow::bail!("lease_ttl must be at least three seconds");
        }

        if self.retry_max_delay < self.retry_base_delay {
            anyhow::bail!("retry_max_delay cannot be lower than retry_base_delay");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "redis://127.0.0.1:6379".to_string(),
        )
    }
}
