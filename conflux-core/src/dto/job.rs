//! Job DTOs for the work queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::dag::JobDescriptor;

/// Default number of execution attempts before a job is dead-lettered
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Envelope carried by the work queue
///
/// `id` belongs to the queue; `job_id` and `task_id` tie the envelope back
/// to the DAG descriptor and session it was dispatched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub id: Uuid,
    /// Executor name
    pub name: String,
    pub job_id: String,
    pub task_id: Uuid,
    #[serde(default)]
    pub data: JsonValue,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(
        name: impl Into<String>,
        job_id: impl Into<String>,
        task_id: Uuid,
        data: JsonValue,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            job_id: job_id.into(),
            task_id,
            data,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueued_at: Utc::now(),
        }
    }

    /// Builds the envelope for a DAG descriptor of session `task_id`
    ///
    /// The descriptor must already carry its id.
    pub fn for_descriptor(task_id: Uuid, job: &JobDescriptor) -> Option<Self> {
        let job_id = job.id()?;
        Some(Self::new(&job.name, job_id, task_id, job.data.clone()))
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Whether another attempt is allowed after the ones already made
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_descriptor_requires_id() {
        let mut job = JobDescriptor::new("github", serde_json::json!({ "repo": "x" }));
        assert!(QueuedJob::for_descriptor(Uuid::new_v4(), &job).is_none());

        job.id = Some("j1".to_string());
        let envelope = QueuedJob::for_descriptor(Uuid::new_v4(), &job).unwrap();
        assert_eq!(envelope.name, "github");
        assert_eq!(envelope.job_id, "j1");
        assert_eq!(envelope.data["repo"], "x");
        assert_eq!(envelope.attempts, 0);
    }

    #[test]
    fn test_retry_budget() {
        let mut job = QueuedJob::new("jira", "j", Uuid::new_v4(), JsonValue::Null).with_max_attempts(2);
        assert!(job.should_retry());
        job.increment_attempts();
        assert!(job.should_retry());
        job.increment_attempts();
        assert!(!job.should_retry());
    }

    #[test]
    fn test_max_attempts_at_least_one() {
        let job = QueuedJob::new("jira", "j", Uuid::new_v4(), JsonValue::Null).with_max_attempts(0);
        assert_eq!(job.max_attempts, 1);
    }
}
