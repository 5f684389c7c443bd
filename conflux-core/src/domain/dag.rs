//! Pipeline DAG
//!
//! A pipeline is an ordered sequence of job descriptors. Position encodes
//! execution order: the job after index `i` is always index `i + 1`.
//!
//! Descriptors get their identity lazily. The first positional access to a
//! descriptor without an id assigns one, and every later access returns the
//! same value.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced while encoding or decoding a DAG snapshot
#[derive(Debug, Error)]
pub enum DagError {
    #[error("Failed to serialize DAG: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to deserialize DAG: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// Two descriptors claim the same id
    #[error("Job id {0} appears more than once")]
    DuplicateId(String),

    #[error("DAG has {0} jobs, at most {MAX_JOBS} are allowed")]
    TooLarge(usize),
}

/// Upper bound on the number of jobs in one pipeline
pub const MAX_JOBS: usize = 10_000;

pub type Result<T> = std::result::Result<T, DagError>;

/// One unit of work in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Stable identity, assigned on first access through [`Dag::get`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the plugin executor that handles this job
    pub name: String,

    /// Opaque provider-specific payload
    #[serde(default)]
    pub data: JsonValue,
}

impl JobDescriptor {
    pub fn new(name: impl Into<String>, data: JsonValue) -> Self {
        Self {
            id: None,
            name: name.into(),
            data,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Ordered, acyclic pipeline definition
///
/// Serialized as a plain JSON array of descriptors so a persisted snapshot
/// reconstructs the exact order and fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dag {
    jobs: Vec<JobDescriptor>,
}

impl Dag {
    pub fn new(jobs: Vec<JobDescriptor>) -> Self {
        Self { jobs }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Returns the descriptor at `index`, assigning it an id if it has none
    ///
    /// Returns `None` when `index` is outside `[0, len)`.
    pub fn get(&mut self, index: usize) -> Option<&JobDescriptor> {
        let job = self.jobs.get_mut(index)?;
        if job.id.as_deref().is_none_or(str::is_empty) {
            job.id = Some(Uuid::new_v4().to_string());
        }
        Some(job)
    }

    /// Position of the first descriptor matching `predicate`
    pub fn find_index<P>(&self, predicate: P) -> Option<usize>
    where
        P: Fn(&JobDescriptor) -> bool,
    {
        self.jobs.iter().position(predicate)
    }

    /// Position of the descriptor carrying `job_id`
    pub fn position_of(&self, job_id: &str) -> Option<usize> {
        self.find_index(|job| job.id() == Some(job_id))
    }

    /// Checks that the DAG can be run
    ///
    /// Every non-empty id must be unique, otherwise `next` could never move
    /// past the second occurrence.
    pub fn validate(&self) -> Result<()> {
        if self.jobs.len() > MAX_JOBS {
            return Err(DagError::TooLarge(self.jobs.len()));
        }

        let mut seen = HashSet::new();
        for id in self.jobs.iter().filter_map(JobDescriptor::id) {
            if !id.is_empty() && !seen.insert(id) {
                return Err(DagError::DuplicateId(id.to_string()));
            }
        }
        Ok(())
    }

    /// Assigns ids to every descriptor that does not have one yet
    pub fn assign_ids(&mut self) {
        for index in 0..self.jobs.len() {
            self.get(index);
        }
    }

    /// Computes the job(s) that should run after `job_id` completed
    ///
    /// With no job id (or an empty one) the pipeline is starting and the
    /// first descriptor is returned. An unknown id or the last job yields an
    /// empty list. The order of the DAG is never changed.
    pub fn next(&mut self, job_id: Option<&str>) -> Vec<JobDescriptor> {
        let next_index = match job_id.filter(|id| !id.is_empty()) {
            None => 0,
            Some(id) => match self.position_of(id) {
                Some(index) => index + 1,
                None => return Vec::new(),
            },
        };

        self.get(next_index).cloned().into_iter().collect()
    }

    pub fn jobs(&self) -> &[JobDescriptor] {
        &self.jobs
    }

    /// Deterministic JSON encoding of the full ordered list
    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string(self).map_err(DagError::Serialize)
    }

    pub fn deserialize(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(DagError::Deserialize)
    }
}

impl From<Vec<JobDescriptor>> for Dag {
    fn from(jobs: Vec<JobDescriptor>) -> Self {
        Self::new(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn three_job_dag() -> Dag {
        Dag::new(vec![
            JobDescriptor::new("gitlab", json!({ "projectId": 1 })),
            JobDescriptor::new("jira", json!({ "boardId": 7 })),
            JobDescriptor::new("dora", JsonValue::Null),
        ])
    }

    #[test]
    fn test_get_assigns_stable_id() {
        let mut dag = three_job_dag();

        let first = dag.get(1).and_then(|j| j.id.clone()).unwrap();
        let second = dag.get(1).and_then(|j| j.id.clone()).unwrap();

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_get_keeps_preexisting_id() {
        let mut job = JobDescriptor::new("github", JsonValue::Null);
        job.id = Some("fixed".to_string());
        let mut dag = Dag::new(vec![job]);

        assert_eq!(dag.get(0).and_then(|j| j.id()), Some("fixed"));
    }

    #[test]
    fn test_get_out_of_range() {
        let mut dag = three_job_dag();
        assert!(dag.get(3).is_none());
        assert!(dag.get(usize::MAX).is_none());
    }

    #[test]
    fn test_empty_dag() {
        let mut dag = Dag::default();

        assert_eq!(dag.len(), 0);
        assert!(dag.get(0).is_none());
        assert!(dag.find_index(|_| true).is_none());
        assert!(dag.next(None).is_empty());
    }

    #[test]
    fn test_find_index_by_name() {
        let dag = three_job_dag();
        assert_eq!(dag.find_index(|j| j.name == "jira"), Some(1));
        assert_eq!(dag.find_index(|j| j.name == "tapd"), None);
    }

    #[test]
    fn test_linear_advancement() {
        let mut dag = three_job_dag();

        let start = dag.next(None);
        assert_eq!(start.len(), 1);
        assert_eq!(start[0].name, "gitlab");
        let first_id = start[0].id.clone().unwrap();

        let second = dag.next(Some(&first_id));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "jira");

        let third = dag.next(second[0].id());
        assert_eq!(third[0].name, "dora");

        assert!(dag.next(third[0].id()).is_empty());
    }

    #[test]
    fn test_next_with_empty_id_starts_pipeline() {
        let mut dag = three_job_dag();
        let start = dag.next(Some(""));
        assert_eq!(start[0].name, "gitlab");
    }

    #[test]
    fn test_next_unknown_id_is_noop() {
        let mut dag = three_job_dag();
        assert!(dag.next(Some("nonexistent-id")).is_empty());
        assert_eq!(dag.len(), 3);
    }

    #[test]
    fn test_single_job_dag_completes_after_first() {
        let mut dag = Dag::new(vec![JobDescriptor::new("Test", JsonValue::Null)]);
        let start = dag.next(None);
        assert!(dag.next(start[0].id()).is_empty());
    }

    #[test]
    fn test_serialized_snapshot_keeps_ids_and_order() {
        let mut dag = three_job_dag();
        dag.assign_ids();

        let raw = dag.serialize().unwrap();
        let restored = Dag::deserialize(&raw).unwrap();

        assert_eq!(restored, dag);
        assert!(restored.jobs().iter().all(|j| j.id.is_some()));
    }

    #[test]
    fn test_deserialize_plain_definition() {
        let dag = Dag::deserialize(r#"[{"name":"Test"},{"name":"jira","data":{"x":1}}]"#).unwrap();

        assert_eq!(dag.len(), 2);
        assert!(dag.jobs()[0].id.is_none());
        assert_eq!(dag.jobs()[0].data, JsonValue::Null);
        assert_eq!(dag.jobs()[1].data, json!({ "x": 1 }));
    }

    fn with_id(name: &str, id: &str) -> JobDescriptor {
        let mut job = JobDescriptor::new(name, JsonValue::Null);
        job.id = Some(id.to_string());
        job
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let dag = Dag::new(vec![with_id("A", "x"), with_id("B", "x")]);

        assert!(matches!(dag.validate(), Err(DagError::DuplicateId(id)) if id == "x"));
    }

    #[test]
    fn test_validate_accepts_missing_and_empty_ids() {
        let dag = Dag::new(vec![
            with_id("A", ""),
            with_id("B", ""),
            JobDescriptor::new("C", JsonValue::Null),
            with_id("D", "d"),
        ]);

        assert!(dag.validate().is_ok());
        assert!(three_job_dag().validate().is_ok());
        assert!(Dag::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_dag() {
        let jobs = vec![JobDescriptor::new("A", JsonValue::Null); MAX_JOBS + 1];

        assert!(matches!(
            Dag::new(jobs).validate(),
            Err(DagError::TooLarge(n)) if n == MAX_JOBS + 1
        ));
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(matches!(
            Dag::deserialize("{not json"),
            Err(DagError::Deserialize(_))
        ));
    }
}
