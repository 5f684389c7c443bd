//! Work queue
//!
//! Durable hand-off between "job ready to run" and "a worker executes it".
//! A single worker consumes every job name and dispatches internally by
//! [`QueuedJob::name`].
//!
//! Reserving a job moves it to a processing area owned by the reserving
//! consumer until the worker reports it as completed, retried or
//! dead-lettered. Consumers renew a lease with [`WorkQueue::heartbeat`];
//! jobs held by a consumer whose lease expired can be recovered.

mod memory;
mod redis_list;

pub use memory::MemoryQueue;
pub use redis_list::{DEFAULT_LEASE, RedisQueue};

use std::time::Duration;

use async_trait::async_trait;
use conflux_core::dto::job::QueuedJob;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the queue backend
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize or deserialize a job envelope
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Queue operations shared by every backend
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueues a job and returns its queue id
    async fn add(&self, job: QueuedJob) -> Result<Uuid>;

    /// Takes the next job, waiting up to `timeout` for one to arrive
    async fn reserve(&self, timeout: Duration) -> Result<Option<QueuedJob>>;

    /// Drops a reserved job after it finished
    ///
    /// A job that is no longer in the processing area is not an error.
    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Puts a reserved job back for another attempt
    async fn retry(&self, job: QueuedJob) -> Result<()>;

    /// Parks a reserved job that will not be attempted again
    async fn dead_letter(&self, job: QueuedJob, error: &str) -> Result<()>;

    /// Renews the lease of this consumer
    ///
    /// Backends without shared processing areas have nothing to renew.
    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    /// Returns jobs abandoned in the processing area to the queue
    ///
    /// Only jobs of consumers without a live lease are touched, plus this
    /// consumer's own leftovers, so call it before reserving. Each
    /// recovered job counts as an attempt; jobs without attempts left are
    /// dead-lettered instead. Returns the number requeued.
    async fn recover_processing(&self) -> Result<usize>;

    async fn stats(&self) -> Result<QueueStats>;
}

/// Statistics about queue state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub queue_name: String,
    /// Jobs waiting to be reserved
    pub pending_jobs: usize,
    /// Jobs reserved by a worker
    pub processing_jobs: usize,
    pub dead_letter_jobs: usize,
}

impl QueueStats {
    pub fn total_jobs(&self) -> usize {
        self.pending_jobs + self.processing_jobs + self.dead_letter_jobs
    }
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} pending, {} processing, {} dead-lettered",
            self.queue_name, self.pending_jobs, self.processing_jobs, self.dead_letter_jobs
        )
    }
}
