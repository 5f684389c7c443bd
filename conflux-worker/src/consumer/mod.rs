//! Job consumer
//!
//! Reserves jobs from the work queue and runs each one through its executor
//! in its own task. Every job ends in exactly one of three ways:
//!
//! - completed: `job:finished` emitted with results, removed from the queue
//! - retried: put back at the head of the queue after a backoff delay
//! - dead-lettered: `queue:failed` and `job:finished` with the error
//!   emitted, parked
//!
//! A panicking executor counts as a failed job. Queue bookkeeping errors
//! after the outcome is known are logged and never keep `job:finished` from
//! being emitted.

mod retry;

pub use retry::retry_delay;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use conflux_broker::{EventBus, WorkQueue};
use conflux_core::JobEvent;
use conflux_core::domain::event::{JOB_FINISHED, QUEUE_FAILED, QueueFailure};
use conflux_core::dto::job::QueuedJob;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::executor::ExecutorRegistry;

/// Pause after a failed reserve before asking the queue again
const RESERVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

const MIN_HEARTBEAT_PERIOD: Duration = Duration::from_millis(10);

/// How a processed job left the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Retried,
    DeadLettered,
}

pub struct JobConsumer {
    config: Config,
    queue: Arc<dyn WorkQueue>,
    bus: Arc<EventBus>,
    registry: Arc<ExecutorRegistry>,
    semaphore: Arc<Semaphore>,
}

impl JobConsumer {
    pub fn new(
        config: Config,
        queue: Arc<dyn WorkQueue>,
        bus: Arc<EventBus>,
        registry: Arc<ExecutorRegistry>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));
        Self {
            config,
            queue,
            bus,
            registry,
            semaphore,
        }
    }

    /// Consumes jobs until `shutdown` resolves, then waits for running jobs
    ///
    /// The consumer's lease is renewed in the background for as long as
    /// this runs.
    pub async fn run<S>(self: &Arc<Self>, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let heartbeat = self.spawn_heartbeat();
        let result = self.consume(shutdown).await;
        heartbeat.abort();
        result
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let period = (self.config.lease_ttl / 3).max(MIN_HEARTBEAT_PERIOD);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = queue.heartbeat().await {
                    warn!("Failed to renew worker lease: {}", e);
                }
            }
        })
    }

    async fn consume<S>(self: &Arc<Self>, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        info!(
            "Worker {} consuming {} (max parallel jobs: {})",
            self.config.worker_id, self.config.queue_name, self.config.max_parallel_jobs
        );

        tokio::pin!(shutdown);

        loop {
            // Reserve only with a free slot
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.semaphore.clone().acquire_owned() => {
                    permit.context("Job semaphore closed")?
                }
            };

            let reserved = tokio::select! {
                _ = &mut shutdown => break,
                reserved = self.queue.reserve(self.config.poll_timeout) => reserved,
            };

            match reserved {
                Ok(Some(job)) => {
                    let consumer = Arc::clone(self);
                    tokio::spawn(async move {
                        let job_id = job.id;
                        if let Err(e) = consumer.process(job).await {
                            error!("Failed to process job {}: {:#}", job_id, e);
                        }
                        drop(permit);
                    });
                }
                Ok(None) => debug!("No jobs available"),
                Err(e) => {
                    error!("Failed to reserve job: {}", e);
                    tokio::time::sleep(RESERVE_ERROR_BACKOFF).await;
                }
            }
        }

        info!("Shutting down, waiting for running jobs");
        let _all = self
            .semaphore
            .acquire_many(self.config.max_parallel_jobs as u32)
            .await
            .context("Job semaphore closed")?;
        info!("Worker {} stopped", self.config.worker_id);
        Ok(())
    }

    /// Runs one reserved job to its outcome
    pub async fn process(&self, mut job: QueuedJob) -> Result<Outcome> {
        let Some(registration) = self.registry.resolve(&job.name) else {
            let error = format!("No executor registered for {}", job.name);
            self.give_up(job, error).await?;
            return Ok(Outcome::DeadLettered);
        };

        job.increment_attempts();
        info!(
            "Executing job {} ({}) for session {}, attempt {}/{}",
            job.job_id, registration.display_name, job.task_id, job.attempts, job.max_attempts
        );

        let executor = Arc::clone(&registration.executor);
        let data = job.data.clone();
        let mut execution = tokio::spawn(async move { executor.execute(data).await });

        let error = match tokio::time::timeout(self.config.job_timeout, &mut execution).await {
            Ok(Ok(Ok(results))) => {
                info!("Job {} finished", job.job_id);
                let published = self
                    .bus
                    .emit(
                        JOB_FINISHED,
                        &JobEvent::success(&job.job_id, job.task_id, Some(results)),
                    )
                    .await
                    .context("Failed to publish completion");
                if let Err(e) = self.queue.complete(job.id).await {
                    warn!("Failed to remove finished job {} from queue: {}", job.job_id, e);
                }
                published?;
                return Ok(Outcome::Completed);
            }
            Err(_) => {
                // timeouts are final
                execution.abort();
                let error = format!("Timed out after {:?}", self.config.job_timeout);
                self.give_up(job, error).await?;
                return Ok(Outcome::DeadLettered);
            }
            Ok(Err(join_error)) => {
                // panics are final
                let error = format!("Executor panicked: {}", join_error);
                self.give_up(job, error).await?;
                return Ok(Outcome::DeadLettered);
            }
            Ok(Ok(Err(e))) => format!("{:#}", e),
        };

        if !job.should_retry() {
            self.give_up(job, error).await?;
            return Ok(Outcome::DeadLettered);
        }

        let delay = retry_delay(
            job.attempts,
            self.config.retry_base_delay,
            self.config.retry_max_delay,
        );
        warn!(
            "Job {} failed (attempt {}/{}): {}. Retrying in {:?}",
            job.job_id, job.attempts, job.max_attempts, error, delay
        );
        tokio::time::sleep(delay).await;

        self.queue.retry(job).await?;
        Ok(Outcome::Retried)
    }

    /// Dead-letters `job` and reports the failure on the bus
    async fn give_up(&self, job: QueuedJob, error: String) -> Result<()> {
        error!("Job {} ({}) failed: {}", job.job_id, job.name, error);

        if let Err(e) = self.queue.dead_letter(job.clone(), &error).await {
            warn!("Failed to dead-letter job {}: {}", job.job_id, e);
        }

        let event = JobEvent::failure(&job.job_id, job.task_id, &error);
        let reported = self
            .bus
            .emit(QUEUE_FAILED, &QueueFailure { job, error })
            .await
            .context("Failed to publish queue failure");
        self.bus
            .emit(JOB_FINISHED, &event)
            .await
            .context("Failed to publish completion")?;
        reported.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::EchoExecutor;
    use async_trait::async_trait;
    use conflux_broker::{MemoryQueue, QueueError, QueueStats};
    use conflux_core::{ExecutorRegistration, PluginExecutor};
    use serde_json::{Value as JsonValue, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Fails every call
    struct Broken;

    #[async_trait]
    impl PluginExecutor for Broken {
        fn version(&self) -> u32 {
            1
        }
        async fn migrate_up(&self, _table_prefix: &str) -> Result<()> {
            Ok(())
        }
        async fn migrate_down(&self, _from_version: &str) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, _data: JsonValue) -> Result<JsonValue> {
            anyhow::bail!("provider unreachable")
        }
    }

    /// Sleeps, tracking how many calls overlap
    struct Slow {
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Slow {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PluginExecutor for Slow {
        fn version(&self) -> u32 {
            1
        }
        async fn migrate_up(&self, _table_prefix: &str) -> Result<()> {
            Ok(())
        }
        async fn migrate_down(&self, _from_version: &str) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, data: JsonValue) -> Result<JsonValue> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(data)
        }
    }

    /// Panics on every call
    struct Panicking;

    #[async_trait]
    impl PluginExecutor for Panicking {
        fn version(&self) -> u32 {
            1
        }
        async fn migrate_up(&self, _table_prefix: &str) -> Result<()> {
            Ok(())
        }
        async fn migrate_down(&self, _from_version: &str) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, _data: JsonValue) -> Result<JsonValue> {
            panic!("index out of bounds")
        }
    }

    /// Memory queue that counts heartbeats and, while `broken` is set,
    /// fails everything after handing out jobs
    struct Observed {
        inner: MemoryQueue,
        broken: bool,
        heartbeats: AtomicUsize,
    }

    impl Observed {
        fn new(broken: bool) -> Self {
            Self {
                inner: MemoryQueue::new("test"),
                broken,
                heartbeats: AtomicUsize::new(0),
            }
        }

        fn check(&self) -> conflux_broker::queue::Result<()> {
            if self.broken { Err(refused()) } else { Ok(()) }
        }
    }

    fn refused() -> QueueError {
        QueueError::ConnectionFailed("connection reset".to_string())
    }

    #[async_trait]
    impl WorkQueue for Observed {
        async fn add(&self, job: QueuedJob) -> conflux_broker::queue::Result<Uuid> {
            self.inner.add(job).await
        }
        async fn reserve(
            &self,
            timeout: Duration,
        ) -> conflux_broker::queue::Result<Option<QueuedJob>> {
            self.inner.reserve(timeout).await
        }
        async fn complete(&self, job_id: Uuid) -> conflux_broker::queue::Result<()> {
            self.check()?;
            self.inner.complete(job_id).await
        }
        async fn retry(&self, job: QueuedJob) -> conflux_broker::queue::Result<()> {
            self.check()?;
            self.inner.retry(job).await
        }
        async fn dead_letter(
            &self,
            job: QueuedJob,
            error: &str,
        ) -> conflux_broker::queue::Result<()> {
            self.check()?;
            self.inner.dead_letter(job, error).await
        }
        async fn heartbeat(&self) -> conflux_broker::queue::Result<()> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn recover_processing(&self) -> conflux_broker::queue::Result<usize> {
            self.check()?;
            self.inner.recover_processing().await
        }
        async fn stats(&self) -> conflux_broker::queue::Result<QueueStats> {
            self.inner.stats().await
        }
    }

    struct Harness {
        consumer: Arc<JobConsumer>,
        queue: Arc<MemoryQueue>,
        finished: mpsc::UnboundedReceiver<JobEvent>,
        failed: mpsc::UnboundedReceiver<QueueFailure>,
        _bus: Arc<EventBus>,
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.poll_timeout = Duration::from_millis(20);
        config.job_timeout = Duration::from_secs(1);
        config.retry_base_delay = Duration::from_millis(1);
        config.retry_max_delay = Duration::from_millis(5);
        config
    }

    async fn harness(config: Config, executors: Vec<ExecutorRegistration>) -> Harness {
        let queue = Arc::new(MemoryQueue::new("test"));
        let bus = Arc::new(EventBus::local());

        let (finished_tx, finished) = mpsc::unbounded_channel();
        bus.on(JOB_FINISHED, move |event: JobEvent| {
            let tx = finished_tx.clone();
            async move {
                let _ = tx.send(event);
                Ok(())
            }
        })
        .await
        .unwrap();

        let (failed_tx, failed) = mpsc::unbounded_channel();
        bus.on(QUEUE_FAILED, move |failure: QueueFailure| {
            let tx = failed_tx.clone();
            async move {
                let _ = tx.send(failure);
                Ok(())
            }
        })
        .await
        .unwrap();

        let mut registry = ExecutorRegistry::new();
        for registration in executors {
            registry.register(registration).unwrap();
        }

        let consumer = JobConsumer::new(config, queue.clone(), bus.clone(), Arc::new(registry));

        Harness {
            consumer: Arc::new(consumer),
            queue,
            finished,
            failed,
            _bus: bus,
        }
    }

    fn echo() -> ExecutorRegistration {
        ExecutorRegistration::new("echo", "Echo", Arc::new(EchoExecutor))
    }

    async fn enqueue_and_reserve(queue: &MemoryQueue, job: QueuedJob) -> QueuedJob {
        queue.add(job).await.unwrap();
        queue
            .reserve(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap()
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event within a second")
            .expect("open channel")
    }

    #[tokio::test]
    async fn test_successful_job_publishes_results() {
        let mut h = harness(test_config(), vec![echo()]).await;
        let task_id = Uuid::new_v4();
        let job = enqueue_and_reserve(
            &h.queue,
            QueuedJob::new("echo", "j1", task_id, json!({ "p": 1 })),
        )
        .await;

        let outcome = h.consumer.process(job).await.unwrap();

        assert_eq!(outcome, Outcome::Completed);
        let event = next(&mut h.finished).await;
        assert_eq!(event.job_id, "j1");
        assert_eq!(event.task_id, task_id);
        assert_eq!(event.results, Some(json!({ "echo": { "p": 1 } })));
        assert!(!event.is_failure());

        let stats = h.queue.stats().await.unwrap();
        assert_eq!(stats.total_jobs(), 0);
    }

    #[tokio::test]
    async fn test_unknown_executor_is_dead_lettered() {
        let mut h = harness(test_config(), vec![echo()]).await;
        let job = enqueue_and_reserve(
            &h.queue,
            QueuedJob::new("github", "j1", Uuid::new_v4(), JsonValue::Null),
        )
        .await;

        let outcome = h.consumer.process(job).await.unwrap();

        assert_eq!(outcome, Outcome::DeadLettered);
        assert_eq!(h.queue.dead_letters().len(), 1);

        let failure = next(&mut h.failed).await;
        assert_eq!(failure.job.name, "github");
        let event = next(&mut h.finished).await;
        assert!(event.error.unwrap().contains("github"));
    }

    #[tokio::test]
    async fn test_failing_job_retried_then_dead_lettered() {
        let mut h = harness(
            test_config(),
            vec![ExecutorRegistration::new("jira", "Jira", Arc::new(Broken))],
        )
        .await;
        let job = QueuedJob::new("jira", "j1", Uuid::new_v4(), JsonValue::Null).with_max_attempts(2);
        let job = enqueue_and_reserve(&h.queue, job).await;

        assert_eq!(h.consumer.process(job).await.unwrap(), Outcome::Retried);

        let pending = h.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert!(h.finished.try_recv().is_err());

        let job = h
            .queue
            .reserve(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.consumer.process(job).await.unwrap(), Outcome::DeadLettered);

        let dead = h.queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].0.attempts, 2);
        assert!(dead[0].1.contains("provider unreachable"));

        let event = next(&mut h.finished).await;
        assert_eq!(event.job_id, "j1");
        assert!(event.is_failure());
    }

    #[tokio::test]
    async fn test_timed_out_job_is_dead_lettered() {
        let mut config = test_config();
        config.job_timeout = Duration::from_millis(20);
        let slow = ExecutorRegistration::new(
            "slow",
            "Slow",
            Arc::new(Slow::new(Duration::from_secs(5))),
        );
        let mut h = harness(config, vec![slow]).await;
        let job = enqueue_and_reserve(
            &h.queue,
            QueuedJob::new("slow", "j1", Uuid::new_v4(), JsonValue::Null),
        )
        .await;

        assert_eq!(h.consumer.process(job).await.unwrap(), Outcome::DeadLettered);

        let event = next(&mut h.finished).await;
        assert!(event.error.unwrap().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_run_respects_parallel_limit() {
        let mut config = test_config();
        config.max_parallel_jobs = 2;
        let slow = Arc::new(Slow::new(Duration::from_millis(30)));
        let mut h = harness(
            config,
            vec![ExecutorRegistration::new("slow", "Slow", slow.clone())],
        )
        .await;

        let task_id = Uuid::new_v4();
        for i in 0..6 {
            h.queue
                .add(QueuedJob::new("slow", format!("j{}", i), task_id, JsonValue::Null))
                .await
                .unwrap();
        }

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let consumer = h.consumer.clone();
        let worker = tokio::spawn(async move {
            consumer
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(next(&mut h.finished).await.job_id);
        }
        seen.sort();
        assert_eq!(seen, vec!["j0", "j1", "j2", "j3", "j4", "j5"]);
        assert!(slow.peak.load(Ordering::SeqCst) <= 2);

        stop_tx.send(()).unwrap();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_panicking_executor_is_dead_lettered() {
        let panicking = ExecutorRegistration::new("jira", "Jira", Arc::new(Panicking));
        let mut h = harness(test_config(), vec![panicking]).await;
        let job = enqueue_and_reserve(
            &h.queue,
            QueuedJob::new("jira", "j1", Uuid::new_v4(), JsonValue::Null).with_max_attempts(3),
        )
        .await;

        assert_eq!(h.consumer.process(job).await.unwrap(), Outcome::DeadLettered);

        let dead = h.queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].1.contains("panicked"));
        let event = next(&mut h.finished).await;
        assert_eq!(event.job_id, "j1");
        assert!(event.is_failure());
    }

    #[tokio::test]
    async fn test_run_survives_panicking_executor() {
        let executors = vec![
            ExecutorRegistration::new("jira", "Jira", Arc::new(Panicking)),
            echo(),
        ];
        let mut h = harness(test_config(), executors).await;
        let task_id = Uuid::new_v4();
        h.queue
            .add(QueuedJob::new("jira", "j1", task_id, JsonValue::Null))
            .await
            .unwrap();
        h.queue
            .add(QueuedJob::new("echo", "j2", task_id, JsonValue::Null))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let consumer = h.consumer.clone();
        let worker = tokio::spawn(async move {
            consumer
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let mut events = vec![next(&mut h.finished).await, next(&mut h.finished).await];
        events.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        assert!(events[0].is_failure());
        assert!(!events[1].is_failure());

        stop_tx.send(()).unwrap();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_finished_event_survives_queue_errors() {
        let queue = Arc::new(Observed::new(true));
        let bus = Arc::new(EventBus::local());
        let (tx, mut finished) = mpsc::unbounded_channel();
        bus.on(JOB_FINISHED, move |event: JobEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
                Ok(())
            }
        })
        .await
        .unwrap();

        let mut registry = ExecutorRegistry::new();
        registry.register(echo()).unwrap();
        let consumer = JobConsumer::new(test_config(), queue.clone(), bus, Arc::new(registry));

        let task_id = Uuid::new_v4();
        queue
            .add(QueuedJob::new("echo", "j1", task_id, JsonValue::Null))
            .await
            .unwrap();
        queue
            .add(QueuedJob::new("github", "j2", task_id, JsonValue::Null))
            .await
            .unwrap();

        let job = queue.reserve(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(consumer.process(job).await.unwrap(), Outcome::Completed);
        let event = next(&mut finished).await;
        assert_eq!(event.job_id, "j1");
        assert!(!event.is_failure());

        let job = queue.reserve(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(consumer.process(job).await.unwrap(), Outcome::DeadLettered);
        let event = next(&mut finished).await;
        assert_eq!(event.job_id, "j2");
        assert!(event.is_failure());
    }

    #[tokio::test]
    async fn test_run_renews_lease() {
        let mut config = test_config();
        config.lease_ttl = Duration::from_millis(30);
        let queue = Arc::new(Observed::new(false));
        let consumer = Arc::new(JobConsumer::new(
            config,
            queue.clone(),
            Arc::new(EventBus::local()),
            Arc::new(ExecutorRegistry::new()),
        ));

        consumer
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        let beats = queue.heartbeats.load(Ordering::SeqCst);
        assert!(beats >= 3, "only {} heartbeats", beats);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.heartbeats.load(Ordering::SeqCst), beats);
    }
}
