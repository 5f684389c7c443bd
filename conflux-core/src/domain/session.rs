//! Session domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::dag::Dag;

/// One pipeline run and the DAG snapshot it governs
///
/// The DAG itself is fixed once the session is created. Everything else is
/// bookkeeping derived from completion events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub dag: Dag,
    pub status: SessionStatus,
    /// Job dispatched and not yet reported back
    pub current_job_id: Option<String>,
    pub finished_jobs: u32,
    pub total_jobs: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: Uuid, dag: Dag) -> Self {
        let now = Utc::now();
        Self {
            id,
            total_jobs: u32::try_from(dag.len()).unwrap_or(u32::MAX),
            dag,
            status: SessionStatus::Started,
            current_job_id: None,
            finished_jobs: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fraction of jobs that completed successfully
    pub fn progress(&self) -> f32 {
        if self.total_jobs == 0 {
            return 1.0;
        }
        self.finished_jobs as f32 / self.total_jobs as f32
    }
}

/// Session lifecycle
///
/// `Started -> Advancing -> ... -> Completed | Stalled`, with `Cancelled`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Started,
    Advancing,
    Completed,
    Stalled,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Stalled | SessionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Started => write!(f, "Started"),
            SessionStatus::Advancing => write!(f, "Advancing"),
            SessionStatus::Completed => write!(f, "Completed"),
            SessionStatus::Stalled => write!(f, "Stalled"),
            SessionStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}
