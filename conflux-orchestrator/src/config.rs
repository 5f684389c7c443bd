//! Orchestrator configuration

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL; `None` keeps sessions in memory
    pub database_url: Option<String>,

    /// Redis URL backing the event bus and the work queue
    pub redis_url: String,

    /// Name of the work queue (prefix of its Redis keys)
    pub queue_name: String,

    /// Address the HTTP API listens on
    pub bind_addr: String,

    /// Attempts granted to every dispatched job
    pub job_max_attempts: u32,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DATABASE_URL (optional, in-memory sessions when unset)
    /// - REDIS_URL (optional, default: redis://127.0.0.1:6379)
    /// - QUEUE_NAME (optional, default: conflux:jobs)
    /// - ORCHESTRATOR_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - JOB_MAX_ATTEMPTS (optional, default: 3)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.is_empty());

        let redis_url = std::env::var("REDIS_URL").unwrap_or(defaults.redis_url);

        let queue_name = std::env::var("QUEUE_NAME").unwrap_or(defaults.queue_name);

        let bind_addr = std::env::var("ORCHESTRATOR_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let job_max_attempts = match std::env::var("JOB_MAX_ATTEMPTS") {
            Ok(raw) => raw
                .parse::<u32>()
                .map_err(|_| anyhow::anyhow!("JOB_MAX_ATTEMPTS must be a number, got {}", raw))?,
            Err(_) => defaults.job_max_attempts,
        };

        Ok(Self {
            database_url,
            redis_url,
            queue_name,
            bind_addr,
            job_max_attempts,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            anyhow::bail!("redis_url must start with redis:// or rediss://");
        }

        if self.queue_name.is_empty() {
            anyhow::bail!("queue_name cannot be empty");
        }

        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.job_max_attempts == 0 {
            anyhow::bail!("job_max_attempts must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            queue_name: "conflux:jobs".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            job_max_attempts: conflux_core::dto::job::DEFAULT_MAX_ATTEMPTS,
        }
    }
}
