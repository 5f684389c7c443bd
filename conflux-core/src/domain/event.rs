//! Bus events
//!
//! Event names used on the event bus and the payloads carried on them.
//! Payloads use camelCase field names on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::session::SessionStatus;
use crate::dto::job::QueuedJob;

/// A job reached a final outcome (success or exhausted failure)
pub const JOB_FINISHED: &str = "job:finished";

/// The work queue gave up on a job
pub const QUEUE_FAILED: &str = "queue:failed";

/// A session changed status
pub const SESSION_STATUS: &str = "session:status";

/// Completion notification for a dispatched job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    /// Session the job belongs to
    pub task_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    pub fn success(job_id: impl Into<String>, task_id: Uuid, results: Option<JsonValue>) -> Self {
        Self {
            job_id: job_id.into(),
            task_id,
            results,
            error: None,
        }
    }

    pub fn failure(job_id: impl Into<String>, task_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            task_id,
            results: None,
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Payload of [`QUEUE_FAILED`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueFailure {
    pub job: QueuedJob,
    pub error: String,
}

/// Payload of [`SESSION_STATUS`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusChanged {
    pub session_id: Uuid,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
