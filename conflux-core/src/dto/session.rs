//! Session DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::dag::JobDescriptor;
use crate::domain::session::{Session, SessionStatus};

/// Request to start a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSession {
    pub jobs: Vec<JobDescriptor>,
}

/// Response to a start request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStarted {
    pub session_id: Uuid,
}

/// Session summary without the DAG snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDto {
    pub id: Uuid,
    pub status: SessionStatus,
    pub current_job_id: Option<String>,
    pub finished_jobs: u32,
    pub total_jobs: u32,
    pub progress: f32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Session> for SessionDto {
    fn from(session: Session) -> Self {
        Self {
            progress: session.progress(),
            id: session.id,
            status: session.status,
            current_job_id: session.current_job_id,
            finished_jobs: session.finished_jobs,
            total_jobs: session.total_jobs,
            error: session.error,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}
