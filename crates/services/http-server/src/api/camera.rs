//! Camera endpoints

use std::time::Instant;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rovercam_core::relay::BodyChunk;
use rovercam_core::{SensorStatus, STREAM_CONTENT_TYPE};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{api_error, map_core_error, ApiError, AppState};

/// Chunks buffered between the relay task and the response body
const STREAM_CHANNEL_DEPTH: usize = 4;

/// GET /capture
pub async fn capture(State(state): State<AppState>) -> Result<Response, ApiError> {
    let started = Instant::now();
    let encoded = state.relay.capture_jpeg().await.map_err(|e| {
        tracing::error!("Camera capture failed: {}", e);
        map_core_error(e)
    })?;

    let jpeg = encoded.bytes().clone();
    encoded.release(state.relay.source());
    tracing::debug!(
        bytes = jpeg.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "JPG captured"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CONTENT_DISPOSITION, "inline; filename=capture.jpg"),
        ],
        jpeg,
    )
        .into_response())
}

/// GET /stream
///
/// The relay runs in its own task and feeds the body through a bounded
/// channel; a slow client blocks the relay on the channel.
pub async fn stream(State(state): State<AppState>) -> Response {
    let (mut tx, rx) = mpsc::channel::<BodyChunk>(STREAM_CHANNEL_DEPTH);
    let relay = state.relay.clone();
    tokio::spawn(async move {
        relay.run(&mut tx).await;
    });

    (
        [(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ControlQuery {
    var: Option<String>,
    val: Option<String>,
}

/// GET /control?var=<name>&val=<int>
pub async fn control(
    State(state): State<AppState>,
    query: Option<Query<ControlQuery>>,
) -> Result<StatusCode, ApiError> {
    let not_found = || api_error(StatusCode::NOT_FOUND, "query", "expected ?var=<name>&val=<int>");

    let Some(Query(ControlQuery {
        var: Some(name),
        val: Some(raw),
    })) = query
    else {
        return Err(not_found());
    };
    let value: i32 = raw.trim().parse().map_err(|_| not_found())?;

    state.sensor.set(&name, value).map_err(|e| {
        tracing::warn!("Control request failed: {}", e);
        map_core_error(e)
    })?;
    Ok(StatusCode::OK)
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<SensorStatus> {
    Json(state.sensor.status())
}
