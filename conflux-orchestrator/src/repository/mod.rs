//! Repository Module
//!
//! Session persistence for the orchestrator. A session row maps a session id
//! to its serialized DAG snapshot plus the bookkeeping derived from
//! completion events.

pub mod memory;
pub mod session;

pub use memory::MemorySessionStore;
pub use session::PgSessionStore;

use async_trait::async_trait;
use conflux_core::{DagError, Session};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a session store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Persisted snapshot could not be decoded
    #[error("Corrupt session snapshot: {0}")]
    Corrupt(#[from] DagError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Key-value store of sessions keyed by session id
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new session and its DAG snapshot
    async fn insert(&self, session: &Session) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<Session>>;

    /// Saves session bookkeeping; returns false when the session is unknown
    ///
    /// The DAG snapshot is written once by [`SessionStore::insert`] and is not
    /// rewritten here.
    async fn update(&self, session: &Session) -> Result<bool>;
}
