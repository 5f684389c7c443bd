//! In-process work queue
//!
//! Same semantics as the Redis queue but confined to one process and lost
//! on exit. Used in single-binary mode and in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use conflux_core::dto::job::QueuedJob;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{QueueStats, Result, WorkQueue};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedJob>,
    processing: HashMap<Uuid, QueuedJob>,
    dead_letter: Vec<(QueuedJob, String)>,
}

pub struct MemoryQueue {
    queue_name: String,
    state: Mutex<QueueState>,
    available: Notify,
}

impl MemoryQueue {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
        }
    }

    /// Jobs waiting to be reserved, in dequeue order
    pub fn pending(&self) -> Vec<QueuedJob> {
        self.state().pending.iter().cloned().collect()
    }

    /// Dead-lettered jobs with the error that parked them
    pub fn dead_letters(&self) -> Vec<(QueuedJob, String)> {
        self.state().dead_letter.clone()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_next(&self) -> Option<QueuedJob> {
        let mut state = self.state();
        let job = state.pending.pop_front()?;
        state.processing.insert(job.id, job.clone());
        Some(job)
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn add(&self, job: QueuedJob) -> Result<Uuid> {
        let id = job.id;
        debug!(queue = %self.queue_name, job = %job.name, %id, "Job enqueued");
        self.state().pending.push_back(job);
        self.available.notify_one();
        Ok(id)
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<QueuedJob>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.take_next() {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return Ok(self.take_next());
            }
        }
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        self.state().processing.remove(&job_id);
        Ok(())
    }

    async fn retry(&self, job: QueuedJob) -> Result<()> {
        {
            let mut state = self.state();
            state.processing.remove(&job.id);
            state.pending.push_front(job);
        }
        self.available.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, job: QueuedJob, error: &str) -> Result<()> {
        let mut state = self.state();
        state.processing.remove(&job.id);
        state.dead_letter.push((job, error.to_string()));
        Ok(())
    }

    async fn recover_processing(&self) -> Result<usize> {
        let mut recovered = 0;
        {
            let mut state = self.state();
            let abandoned: Vec<QueuedJob> = state.processing.drain().map(|(_, job)| job).collect();
            for mut job in abandoned {
                job.increment_attempts();
                if job.should_retry() {
                    state.pending.push_back(job);
                    recovered += 1;
                } else {
                    state.dead_letter.push((
                        job,
                        "Recovered from processing queue after max attempts".to_string(),
                    ));
                }
            }
        }
        for _ in 0..recovered {
            self.available.notify_one();
        }
        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state();
        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            pending_jobs: state.pending.len(),
            processing_jobs: state.processing.len(),
            dead_letter_jobs: state.dead_letter.len(),
        })
    }
}
