//! Task Service
//!
//! Drives a session through its DAG: dispatches the first job when a session
//! starts and the following one each time a `job:finished` event arrives.
//! At most one job per session is in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use conflux_broker::{BusError, EventBus, QueueError, Subscription, WorkQueue};
use conflux_core::domain::event::{JOB_FINISHED, SESSION_STATUS, SessionStatusChanged};
use conflux_core::dto::job::{DEFAULT_MAX_ATTEMPTS, QueuedJob};
use conflux_core::{Dag, DagError, JobDescriptor, JobEvent, Session, SessionStatus};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::repository::{SessionStore, StoreError};

/// Service error type
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("{0}")]
    InvalidState(String),

    #[error("Invalid pipeline: {0}")]
    InvalidDag(#[from] DagError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

pub type Result<T> = std::result::Result<T, TaskError>;

type SessionLock = Arc<tokio::sync::Mutex<()>>;

pub struct TaskService {
    store: Arc<dyn SessionStore>,
    queue: Arc<dyn WorkQueue>,
    bus: Arc<EventBus>,
    max_attempts: u32,
    /// Serializes advancement per session
    session_locks: Mutex<HashMap<Uuid, SessionLock>>,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        queue: Arc<dyn WorkQueue>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            queue,
            bus,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts granted to every job this service dispatches
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Starts a new session for `dag` and dispatches its first job
    ///
    /// An empty DAG completes immediately without enqueueing anything.
    pub async fn start_task(&self, mut dag: Dag) -> Result<Uuid> {
        dag.validate()?;
        let session_id = Uuid::new_v4();

        // Ids must be in the snapshot so completion events can be located
        // after the DAG is reloaded.
        dag.assign_ids();

        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let mut session = Session::new(session_id, dag);
        self.store.insert(&session).await?;

        info!(
            "Session {} started with {} job(s)",
            session_id, session.total_jobs
        );

        let next = session.dag.next(None);
        let result = self.advance(&mut session, next).await;

        if session.status.is_terminal() {
            self.forget_session(session_id);
        }
        result.map(|_| session_id)
    }

    /// Registers this service as the `job:finished` handler on its bus
    pub async fn subscribe(self: &Arc<Self>) -> Result<Subscription> {
        let service = Arc::clone(self);

        let subscription = self
            .bus
            .on(JOB_FINISHED, move |event: JobEvent| {
                let service = Arc::clone(&service);
                async move {
                    match service.handle_job_finished(event).await {
                        Err(TaskError::SessionNotFound(id)) => {
                            warn!("Completion event for unknown session {}", id);
                            Ok(())
                        }
                        other => other.map_err(anyhow::Error::from),
                    }
                }
            })
            .await?;

        info!("Listening for {} events", JOB_FINISHED);
        Ok(subscription)
    }

    /// Applies a completion event to its session
    pub async fn handle_job_finished(&self, event: JobEvent) -> Result<()> {
        let session_id = event.task_id;
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let mut session = match self.store.find(session_id).await? {
            Some(session) => session,
            None => {
                self.forget_session(session_id);
                return Err(TaskError::SessionNotFound(session_id));
            }
        };

        if session.status.is_terminal() {
            debug!(
                "Ignoring completion of job {} for {} session {}",
                event.job_id, session.status, session_id
            );
            return Ok(());
        }

        if session.current_job_id.as_deref() != Some(event.job_id.as_str()) {
            warn!(
                "Ignoring completion of job {} for session {}: expected {:?}",
                event.job_id, session_id, session.current_job_id
            );
            return Ok(());
        }

        let result = match event.error {
            Some(error) => {
                warn!(
                    "Job {} of session {} failed: {}",
                    event.job_id, session_id, error
                );
                self.stall(&mut session, error).await
            }
            None => {
                session.finished_jobs += 1;
                debug!(
                    "Job {} of session {} finished ({}/{})",
                    event.job_id, session_id, session.finished_jobs, session.total_jobs
                );
                let next = session.dag.next(Some(event.job_id.as_str()));
                self.advance(&mut session, next).await
            }
        };

        if session.status.is_terminal() {
            self.forget_session(session_id);
        }
        result
    }

    /// Get a session by ID
    pub async fn get_session(&self, id: Uuid) -> Result<Session> {
        self.store
            .find(id)
            .await?
            .ok_or(TaskError::SessionNotFound(id))
    }

    /// Moves a running session to `Cancelled`
    ///
    /// The job in flight is not recalled; its completion is ignored.
    pub async fn cancel_session(&self, id: Uuid) -> Result<Session> {
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let Some(mut session) = self.store.find(id).await? else {
            self.forget_session(id);
            return Err(TaskError::SessionNotFound(id));
        };

        if session.status.is_terminal() {
            return Err(TaskError::InvalidState(format!(
                "Session {} is already {}",
                id, session.status
            )));
        }

        let previous = session.status;
        session.status = SessionStatus::Cancelled;
        session.current_job_id = None;
        self.save(&mut session, previous).await?;
        self.forget_session(id);

        info!("Session {} cancelled", id);
        Ok(session)
    }

    /// Dispatches the job a stalled session stopped at once more
    pub async fn rerun_session(&self, id: Uuid) -> Result<Session> {
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let Some(mut session) = self.store.find(id).await? else {
            self.forget_session(id);
            return Err(TaskError::SessionNotFound(id));
        };

        if session.status != SessionStatus::Stalled {
            return Err(TaskError::InvalidState(format!(
                "Session {} is {}, only stalled sessions can be rerun",
                id, session.status
            )));
        }

        let job = session
            .current_job_id
            .as_deref()
            .and_then(|job_id| session.dag.position_of(job_id))
            .map(|index| session.dag.jobs()[index].clone())
            .ok_or_else(|| TaskError::InvalidState(format!("Session {} has no job to rerun", id)))?;

        info!("Rerunning job {} of session {}", job.name, id);
        session.error = None;
        let result = self
            .dispatch(&mut session, &job, SessionStatus::Advancing)
            .await;

        if session.status.is_terminal() {
            self.forget_session(id);
        }
        result.map(|_| session)
    }

    // =========================================================================
    // Advancement
    // =========================================================================

    /// Dispatches the first of `next`, or completes the session when empty
    async fn advance(&self, session: &mut Session, next: Vec<JobDescriptor>) -> Result<()> {
        let Some(job) = next.into_iter().next() else {
            let previous = session.status;
            session.status = SessionStatus::Completed;
            session.current_job_id = None;
            self.save(session, previous).await?;
            info!("Session {} completed", session.id);
            return Ok(());
        };

        let status = if session.finished_jobs == 0 {
            SessionStatus::Started
        } else {
            SessionStatus::Advancing
        };
        self.dispatch(session, &job, status).await
    }

    /// Enqueues `job` as the session's job in flight
    ///
    /// On an enqueue failure the session stalls on that job, so it can be
    /// rerun later.
    async fn dispatch(
        &self,
        session: &mut Session,
        job: &JobDescriptor,
        status: SessionStatus,
    ) -> Result<()> {
        let previous = session.status;

        let Some(queued) = QueuedJob::for_descriptor(session.id, job) else {
            let error = format!("Job {} has no id", job.name);
            self.stall(session, error.clone()).await?;
            return Err(TaskError::InvalidState(error));
        };
        let queued = queued.with_max_attempts(self.max_attempts);
        let job_id = queued.job_id.clone();
        session.current_job_id = Some(job_id.clone());

        if let Err(e) = self.queue.add(queued).await {
            self.stall(session, format!("Failed to enqueue job {}: {}", job_id, e))
                .await?;
            return Err(e.into());
        }

        info!(
            "Dispatched job {} ({}) for session {}",
            job_id, job.name, session.id
        );

        session.status = status;
        self.save(session, previous).await
    }

    async fn stall(&self, session: &mut Session, error: String) -> Result<()> {
        let previous = session.status;
        session.status = SessionStatus::Stalled;
        session.error = Some(error);
        self.save(session, previous).await
    }

    /// Persists bookkeeping and announces a status change
    async fn save(&self, session: &mut Session, previous: SessionStatus) -> Result<()> {
        session.updated_at = chrono::Utc::now();

        if !self.store.update(session).await? {
            return Err(TaskError::SessionNotFound(session.id));
        }

        if session.status != previous {
            self.notify(session).await;
        }
        Ok(())
    }

    async fn notify(&self, session: &Session) {
        let change = SessionStatusChanged {
            session_id: session.id,
            status: session.status,
            error: session.error.clone(),
        };

        if let Err(e) = self.bus.emit(SESSION_STATUS, &change).await {
            warn!(
                "Failed to publish status {} of session {}: {}",
                session.status, session.id, e
            );
        }
    }

    // =========================================================================
    // Session locks
    // =========================================================================

    fn session_lock(&self, id: Uuid) -> SessionLock {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(id).or_default())
    }

    fn forget_session(&self, id: Uuid) {
        self.session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
    }
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
