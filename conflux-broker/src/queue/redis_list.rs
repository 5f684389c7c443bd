//! Redis-backed work queue
//!
//! The queue uses these Redis keys:
//!
//! - `{queue_name}`: main queue where jobs are enqueued
//! - `{queue_name}:processing:{consumer_id}`: jobs reserved by one consumer
//! - `{queue_name}:worker:{consumer_id}`: lease of that consumer, kept alive
//!   by [`WorkQueue::heartbeat`]
//! - `{queue_name}:dead_letter`: jobs that will not be attempted again
//!
//! Jobs are pushed on the left and reserved from the right with BRPOPLPUSH,
//! which moves them to the consumer's processing list atomically. A
//! processing list is only recovered once its owner's lease has expired.

use std::time::Duration;

use async_trait::async_trait;
use conflux_core::dto::job::QueuedJob;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{QueueError, QueueStats, Result, WorkQueue};

/// Lease granted by one heartbeat unless configured otherwise
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

const RECOVERED_ERROR: &str = "Recovered from processing queue after max attempts";

pub struct RedisQueue {
    /// Redis connection manager (handles reconnection automatically)
    redis: ConnectionManager,
    /// Connection reserved for BRPOPLPUSH so a blocked reserve never holds
    /// up other commands
    blocking: ConnectionManager,
    queue_name: String,
    consumer_id: String,
    lease: Duration,
    keys: QueueKeys,
}

/// Redis keys owned by one consumer of a queue
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueKeys {
    processing: String,
    heartbeat: String,
    dead_letter: String,
}

impl QueueKeys {
    fn new(queue_name: &str, consumer_id: &str) -> Self {
        Self {
            processing: format!("{}:processing:{}", queue_name, consumer_id),
            heartbeat: heartbeat_key(queue_name, consumer_id),
            dead_letter: format!("{}:dead_letter", queue_name),
        }
    }
}

fn heartbeat_key(queue_name: &str, consumer_id: &str) -> String {
    format!("{}:worker:{}", queue_name, consumer_id)
}

fn processing_pattern(queue_name: &str) -> String {
    format!("{}:processing:*", queue_name)
}

/// Consumer id encoded in a processing list key
fn processing_owner<'a>(queue_name: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(queue_name)?
        .strip_prefix(":processing:")
        .filter(|owner| !owner.is_empty())
}

impl RedisQueue {
    /// Connects to Redis and creates a new job queue
    ///
    /// The queue gets a random consumer id; workers should set their own
    /// with [`RedisQueue::with_consumer`].
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `queue_name` - Name of the queue (used as prefix for Redis keys)
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connections(redis, blocking, queue_name))
    }

    /// Creates a queue from existing connection managers
    ///
    /// `blocking` only serves `reserve` and must not be shared with other
    /// users.
    pub fn from_connections(
        redis: ConnectionManager,
        blocking: ConnectionManager,
        queue_name: &str,
    ) -> Self {
        let consumer_id = Uuid::new_v4().to_string();
        Self {
            redis,
            blocking,
            queue_name: queue_name.to_string(),
            keys: QueueKeys::new(queue_name, &consumer_id),
            consumer_id,
            lease: DEFAULT_LEASE,
        }
    }

    /// Names the consumer reserving through this queue and the lease one
    /// heartbeat grants it
    pub fn with_consumer(mut self, consumer_id: &str, lease: Duration) -> Self {
        self.consumer_id = consumer_id.to_string();
        self.keys = QueueKeys::new(&self.queue_name, consumer_id);
        self.lease = lease;
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Finds the raw entry of `job_id` in this consumer's processing list
    async fn find_processing_entry(&self, job_id: Uuid) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn.lrange(&self.keys.processing, 0, -1).await?;

        Ok(entries.into_iter().find(|raw| {
            serde_json::from_str::<QueuedJob>(raw).is_ok_and(|job| job.id == job_id)
        }))
    }

    async fn remove_from_processing(&self, job_id: Uuid) -> Result<()> {
        if let Some(raw) = self.find_processing_entry(job_id).await? {
            let mut conn = self.redis.clone();
            conn.lrem::<_, _, ()>(&self.keys.processing, 1, raw).await?;
        }
        Ok(())
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn processing_lists(&self) -> Result<Vec<String>> {
        let mut conn = self.redis.clone();
        let keys: Vec<String> = conn.keys(processing_pattern(&self.queue_name)).await?;
        Ok(keys)
    }

    /// Whether the consumer owning `processing_key` still holds a lease
    async fn owner_alive(&self, processing_key: &str) -> Result<bool> {
        let Some(owner) = processing_owner(&self.queue_name, processing_key) else {
            return Ok(false);
        };
        if owner == self.consumer_id {
            // leftovers of an earlier run under the same id
            return Ok(false);
        }

        let mut conn = self.redis.clone();
        let alive: bool = conn.exists(heartbeat_key(&self.queue_name, owner)).await?;
        Ok(alive)
    }

    /// Moves every job of `processing_key` back to the queue or to the
    /// dead letter list
    async fn recover_list(&self, processing_key: &str) -> Result<usize> {
        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn.lrange(processing_key, 0, -1).await?;
        let mut recovered = 0;

        for raw in entries {
            let Ok(mut job) = serde_json::from_str::<QueuedJob>(&raw) else {
                warn!("Dropping unreadable entry from {}", processing_key);
                conn.lrem::<_, _, ()>(processing_key, 1, &raw).await?;
                continue;
            };
            job.increment_attempts();

            let mut pipe = redis::pipe();
            pipe.atomic().lrem(processing_key, 1, &raw);
            if job.should_retry() {
                pipe.rpush(&self.queue_name, serde_json::to_string(&job)?);
                recovered += 1;
            } else {
                pipe.lpush(
                    &self.keys.dead_letter,
                    dead_letter_entry(&job, RECOVERED_ERROR)?,
                );
            }
            pipe.query_async::<_, ()>(&mut conn).await?;
        }

        Ok(recovered)
    }
}

fn dead_letter_entry(job: &QueuedJob, error: &str) -> Result<String> {
    let entry = serde_json::json!({
        "job": job,
        "error": error,
        "movedAt": chrono::Utc::now().to_rfc3339(),
    });
    Ok(serde_json::to_string(&entry)?)
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn add(&self, job: QueuedJob) -> Result<Uuid> {
        let id = job.id;
        let serialized = serde_json::to_string(&job)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(id)
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<QueuedJob>> {
        let mut conn = self.blocking.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.keys.processing)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match raw {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        self.remove_from_processing(job_id).await
    }

    async fn retry(&self, job: QueuedJob) -> Result<()> {
        self.remove_from_processing(job.id).await?;

        // Right side is the dequeue side, so the retry runs next
        let serialized = serde_json::to_string(&job)?;
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(())
    }

    async fn dead_letter(&self, job: QueuedJob, error: &str) -> Result<()> {
        self.remove_from_processing(job.id).await?;

        let serialized = dead_letter_entry(&job, error)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.keys.dead_letter, serialized)
            .await?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let lease_ms = self.lease.as_millis().max(1) as u64;
        redis::cmd("SET")
            .arg(&self.keys.heartbeat)
            .arg(chrono::Utc::now().timestamp())
            .arg("PX")
            .arg(lease_ms)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover_processing(&self) -> Result<usize> {
        let mut recovered = 0;

        for key in self.processing_lists().await? {
            if self.owner_alive(&key).await? {
                debug!("Skipping {}: owner holds a lease", key);
                continue;
            }
            recovered += self.recover_list(&key).await?;
        }

        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let (pending_jobs, dead_letter_jobs, processing_lists) = tokio::try_join!(
            self.list_len(&self.queue_name),
            self.list_len(&self.keys.dead_letter),
            self.processing_lists()
        )?;

        let mut processing_jobs = 0;
        for key in &processing_lists {
            processing_jobs += self.list_len(key).await?;
        }

        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            pending_jobs,
            processing_jobs,
            dead_letter_jobs,
        })
    }
}
