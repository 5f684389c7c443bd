//! Core domain types
//!
//! This module contains the domain structures shared by the Conflux services.
//! The orchestrator persists them and the worker reports against them.

pub mod dag;
pub mod event;
pub mod session;
