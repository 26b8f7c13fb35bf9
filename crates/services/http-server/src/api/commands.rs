//! Controller endpoints
//!
//! Both go through the same shared link, one exchange at a time.

use axum::{
    body::Bytes,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use rovercam_core::BatchResult;

use super::{map_core_error, ApiError, AppState};

/// POST /api/path
///
/// Per-action failures are entries in `acks`; only a bad body is an error.
pub async fn submit_path(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BatchResult>, ApiError> {
    tracing::debug!(
        bytes = body.len(),
        limit = state.dispatcher.config().max_body_bytes,
        "Path request"
    );

    let result = state.dispatcher.dispatch(&body).await.map_err(|e| {
        tracing::warn!("Rejected path request: {}", e);
        map_core_error(e)
    })?;

    let acked = result.acks.iter().filter(|entry| entry.is_acked()).count();
    tracing::info!(
        actions = result.acks.len(),
        acked,
        failed = result.acks.len() - acked,
        "Path request done"
    );
    Ok(Json(result))
}

/// GET /api/pose
///
/// Returns the controller's reply body unchanged.
pub async fn query_pose(State(state): State<AppState>) -> Result<Response, ApiError> {
    let reply = state.pose.query().await.map_err(|e| {
        tracing::warn!("Pose query failed: {}", e);
        map_core_error(e)
    })?;

    Ok(([(header::CONTENT_TYPE, "application/json")], reply.body).into_response())
}
