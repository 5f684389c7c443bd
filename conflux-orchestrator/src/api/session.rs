//! Session API Handlers
//!
//! HTTP endpoints for the session lifecycle.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conflux_core::Dag;
use conflux_core::dto::session::{SessionDto, SessionStarted, StartSession};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::TaskService;

/// POST /sessions
/// Start a session for the submitted job list
pub async fn start_session(
    State(service): State<Arc<TaskService>>,
    Json(req): Json<StartSession>,
) -> ApiResult<(StatusCode, Json<SessionStarted>)> {
    tracing::info!("Starting session with {} job(s)", req.jobs.len());

    let session_id = service.start_task(Dag::new(req.jobs)).await?;

    Ok((StatusCode::CREATED, Json(SessionStarted { session_id })))
}

/// GET /sessions/{id}
pub async fn get_session(
    State(service): State<Arc<TaskService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionDto>> {
    tracing::debug!("Getting session: {}", id);

    let session = service.get_session(id).await?;
    Ok(Json(session.into()))
}

/// POST /sessions/{id}/cancel
pub async fn cancel_session(
    State(service): State<Arc<TaskService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionDto>> {
    tracing::info!("Cancelling session: {}", id);

    let session = service.cancel_session(id).await?;
    Ok(Json(session.into()))
}

/// POST /sessions/{id}/rerun
/// Dispatch the job a stalled session stopped at once more
pub async fn rerun_session(
    State(service): State<Arc<TaskService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionDto>> {
    tracing::info!("Rerunning session: {}", id);

    let session = service.rerun_session(id).await?;
    Ok(Json(session.into()))
}
