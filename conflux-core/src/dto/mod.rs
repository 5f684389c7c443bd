//! Data Transfer Objects for inter-service communication
//!
//! DTOs used between the Conflux orchestrator, the work queue and workers.

pub mod job;
pub mod session;
