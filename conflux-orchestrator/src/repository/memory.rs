//! In-memory session store
//!
//! Sessions are kept for the lifetime of the process only. Used when no
//! database is configured and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use conflux_core::Session;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Result, SessionStore};

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn update(&self, session: &Session) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        let Some(stored) = sessions.get_mut(&session.id) else {
            return Ok(false);
        };

        stored.status = session.status;
        stored.current_job_id = session.current_job_id.clone();
        stored.finished_jobs = session.finished_jobs;
        stored.error = session.error.clone();
        stored.updated_at = session.updated_at;
        Ok(true)
    }
}
