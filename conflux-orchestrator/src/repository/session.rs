//! Session Repository
//!
//! Handles all database operations related to sessions.

use async_trait::async_trait;
use conflux_core::{Dag, Session, SessionStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Result, SessionStore, StoreError};

/// Postgres-backed session store
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let dag = session.dag.serialize()?;

        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, dag, status, current_job_id, finished_jobs, total_jobs,
                error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session.id)
        .bind(dag)
        .bind(status_to_string(session.status))
        .bind(&session.current_job_id)
        .bind(session.finished_jobs as i32)
        .bind(session.total_jobs as i32)
        .bind(&session.error)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, dag, status, current_job_id, finished_jobs, total_jobs,
                   error, created_at, updated_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn update(&self, session: &Session) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = $1, current_job_id = $2, finished_jobs = $3,
                error = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(status_to_string(session.status))
        .bind(&session.current_job_id)
        .bind(session.finished_jobs as i32)
        .bind(&session.error)
        .bind(session.updated_at)
        .bind(session.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Started => "Started",
        SessionStatus::Advancing => "Advancing",
        SessionStatus::Completed => "Completed",
        SessionStatus::Stalled => "Stalled",
        SessionStatus::Cancelled => "Cancelled",
    }
}

fn string_to_status(s: &str) -> SessionStatus {
    match s {
        "Started" => SessionStatus::Started,
        "Advancing" => SessionStatus::Advancing,
        "Completed" => SessionStatus::Completed,
        "Cancelled" => SessionStatus::Cancelled,
        // anything unreadable cannot make progress
        _ => SessionStatus::Stalled,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    dag: String,
    status: String,
    current_job_id: Option<String>,
    finished_jobs: i32,
    total_jobs: i32,
    error: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> std::result::Result<Self, Self::Error> {
        Ok(Session {
            id: row.id,
            dag: Dag::deserialize(&row.dag)?,
            status: string_to_status(&row.status),
            current_job_id: row.current_job_id,
            finished_jobs: row.finished_jobs.max(0) as u32,
            total_jobs: row.total_jobs.max(0) as u32,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::JobDescriptor;

    fn row(dag: &str, status: &str) -> SessionRow {
        SessionRow {
            id: Uuid::new_v4(),
            dag: dag.to_string(),
            status: status.to_string(),
            current_job_id: Some("j1".to_string()),
            finished_jobs: 1,
            total_jobs: 2,
            error: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_status_strings_are_symmetric() {
        for status in [
            SessionStatus::Started,
            SessionStatus::Advancing,
            SessionStatus::Completed,
            SessionStatus::Stalled,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(string_to_status(status_to_string(status)), status);
        }
    }

    #[test]
    fn test_unknown_status_maps_to_stalled() {
        assert_eq!(string_to_status("Bogus"), SessionStatus::Stalled);
    }

    #[test]
    fn test_row_to_session() {
        let mut dag = Dag::new(vec![JobDescriptor::new("jira", serde_json::Value::Null)]);
        dag.assign_ids();
        let raw = dag.serialize().unwrap();

        let session = Session::try_from(row(&raw, "Advancing")).unwrap();

        assert_eq!(session.dag, dag);
        assert_eq!(session.status, SessionStatus::Advancing);
        assert_eq!(session.finished_jobs, 1);
        assert_eq!(session.total_jobs, 2);
    }

    #[test]
    fn test_corrupt_snapshot() {
        let result = Session::try_from(row("not json", "Started"));
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
