//! API Module
//!
//! Thin HTTP control surface over the task service.

pub mod error;
pub mod health;
pub mod session;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::service::TaskService;

/// Create the main API router with all endpoints
pub fn create_router(service: Arc<TaskService>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Session endpoints
        .route("/sessions", post(session::start_session))
        .route("/sessions/{id}", get(session::get_session))
        .route("/sessions/{id}/cancel", post(session::cancel_session))
        .route("/sessions/{id}/rerun", post(session::rerun_session))
        // Add state and middleware
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}
