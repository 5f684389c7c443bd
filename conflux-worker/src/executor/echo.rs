//! Built-in executor that hands its input back as results

use anyhow::Result;
use async_trait::async_trait;
use conflux_core::PluginExecutor;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

pub struct EchoExecutor;

#[async_trait]
impl PluginExecutor for EchoExecutor {
    fn version(&self) -> u32 {
        1
    }

    async fn migrate_up(&self, table_prefix: &str) -> Result<()> {
        // nothing to create
        debug!("echo executor ready (prefix {})", table_prefix);
        Ok(())
    }

    async fn migrate_down(&self, _from_version: &str) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, data: JsonValue) -> Result<JsonValue> {
        Ok(json!({ "echo": data }))
    }
}
