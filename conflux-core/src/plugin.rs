//! Plugin executor contract
//!
//! Every data provider (issue tracker, git host, CI system) implements
//! [`PluginExecutor`]. Workers resolve the executor for a queued job by the
//! job's name through an explicit registry built at startup.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Provider-specific unit of work
///
/// Implementations may be invoked concurrently for different jobs and must
/// not share mutable state across invocations unless they serialize it.
#[async_trait]
pub trait PluginExecutor: Send + Sync {
    /// Schema/version identity of this executor
    fn version(&self) -> u32;

    /// Idempotent setup step, run once when a worker starts
    ///
    /// `table_prefix` namespaces anything the executor creates.
    async fn migrate_up(&self, table_prefix: &str) -> Result<()>;

    /// Rollback hook
    async fn migrate_down(&self, from_version: &str) -> Result<()>;

    /// Performs the work; the returned value becomes the job's results
    async fn execute(&self, data: JsonValue) -> Result<JsonValue>;
}

/// Registry entry binding a job name to an executor
#[derive(Clone)]
pub struct ExecutorRegistration {
    /// Job name this executor claims
    pub name: String,
    /// Human readable name used in logs
    pub display_name: String,
    pub executor: Arc<dyn PluginExecutor>,
}

impl ExecutorRegistration {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        executor: Arc<dyn PluginExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            executor,
        }
    }
}

impl std::fmt::Debug for ExecutorRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistration")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("version", &self.executor.version())
            .finish()
    }
}
