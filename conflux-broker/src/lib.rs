//! Conflux Broker
//!
//! The communication layer shared by the orchestrator and workers. The two
//! processes never share memory; they only talk through:
//!
//! - the [`EventBus`]: publish/subscribe notifications keyed by event name
//! - a [`WorkQueue`]: durable hand-off of runnable jobs to workers
//!
//! Both come with an in-process implementation (single binary, tests) and a
//! Redis implementation (multi-process deployments).
//!
//! # Example
//!
//! ```no_run
//! use conflux_broker::EventBus;
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bus = EventBus::local();
//!
//!     bus.on("Custom", |payload: Value| async move {
//!         println!("received {payload}");
//!         Ok(())
//!     })
//!     .await?;
//!
//!     bus.emit("Custom", &json!({ "ut": "test" })).await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod queue;

pub use bus::{BusError, EventBus, Subscription};
pub use queue::{DEFAULT_LEASE, MemoryQueue, QueueError, QueueStats, RedisQueue, WorkQueue};
