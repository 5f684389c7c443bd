//! Conflux Core
//!
//! Core types and abstractions for the Conflux pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: the pipeline DAG, sessions and completion events
//! - DTOs: payloads exchanged between the orchestrator and workers
//! - The plugin executor contract implemented by every data provider

pub mod domain;
pub mod dto;
pub mod plugin;

pub use domain::dag::{Dag, DagError, JobDescriptor};
pub use domain::event::JobEvent;
pub use domain::session::{Session, SessionStatus};
pub use plugin::{ExecutorRegistration, PluginExecutor};
