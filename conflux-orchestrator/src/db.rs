use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// One row per pipeline run; `dag` holds the serialized snapshot
const CREATE_SESSIONS: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id UUID PRIMARY KEY,
        dag TEXT NOT NULL,
        status VARCHAR(50) NOT NULL,
        current_job_id TEXT,
        finished_jobs INTEGER NOT NULL DEFAULT 0,
        total_jobs INTEGER NOT NULL DEFAULT 0,
        error TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
"#;

/// Job ids are caller-supplied and unbounded
const WIDEN_CURRENT_JOB_ID: &str = "ALTER TABLE sessions ALTER COLUMN current_job_id TYPE TEXT";

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_SESSIONS).execute(pool).await?;
    sqlx::query(WIDEN_CURRENT_JOB_ID).execute(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at DESC)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
