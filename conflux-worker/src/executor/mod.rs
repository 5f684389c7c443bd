//! Executor registry
//!
//! Maps job names to plugin executors. The registry is built explicitly at
//! startup; a queued job whose name is not registered cannot run.

mod echo;

pub use echo::EchoExecutor;

use anyhow::{Context, Result};
use conflux_core::ExecutorRegistration;
use tracing::info;

#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    /// Registration order is migration order
    executors: Vec<ExecutorRegistration>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an executor; names must be unique
    pub fn register(&mut self, registration: ExecutorRegistration) -> Result<()> {
        if self.resolve(&registration.name).is_some() {
            anyhow::bail!("Executor {} is already registered", registration.name);
        }
        self.executors.push(registration);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<&ExecutorRegistration> {
        self.executors.iter().find(|r| r.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.executors.iter().map(|r| r.name.as_str()).collect()
    }

    /// Runs every executor's `migrate_up`, one at a time, in registration order
    ///
    /// Each executor gets its own prefix, `{table_prefix}{name}_`, so two
    /// executors never share tables. Stops at the first failure.
    pub async fn migrate_up_all(&self, table_prefix: &str) -> Result<()> {
        for registration in &self.executors {
            let prefix = format!("{}{}_", table_prefix, registration.name);
            info!(
                "Migrating {} (v{})...",
                registration.display_name,
                registration.executor.version()
            );

            registration
                .executor
                .migrate_up(&prefix)
                .await
                .with_context(|| format!("Migration of {} failed", registration.display_name))?;

            info!("Migrated {}", registration.display_name);
        }
        Ok(())
    }

    /// Rolls every executor back, in reverse registration order
    pub async fn migrate_down_all(&self, from_version: &str) -> Result<()> {
        for registration in self.executors.iter().rev() {
            info!(
                "Rolling back {} from version {}",
                registration.display_name, from_version
            );

            registration
                .executor
                .migrate_down(from_version)
                .await
                .with_context(|| format!("Rollback of {} failed", registration.display_name))?;
        }
        Ok(())
    }
}
