//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services coordinate the session store, the work queue and the event bus.

pub mod task;

pub use task::{TaskError, TaskService};
