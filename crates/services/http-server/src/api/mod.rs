//! HTTP API for RoverCam
//!
//! - `POST /api/path` - Run a batch of move/turn actions
//! - `GET /api/pose` - Ask the controller for its pose
//! - `GET /capture` - Single JPEG still
//! - `GET /stream` - MJPEG stream
//! - `GET /control?var=&val=` - Set a camera sensor parameter
//! - `GET /status` - Camera sensor parameters
//! - `GET /ui` - Control page

pub mod camera;
pub mod commands;
pub mod ui;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use rovercam_core::{
    ActionDispatcher, CameraSensor, CommandCodec, Error, FrameSource, JpegEncoder,
    PoseQueryBridge, SharedLink, StreamRelay,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Batch executor for `/api/path`
    pub dispatcher: ActionDispatcher,
    /// Pose round trip for `/api/pose`
    pub pose: PoseQueryBridge,
    /// Capture/encode loop for `/capture` and `/stream`
    pub relay: StreamRelay,
    /// Camera sensor for `/control` and `/status`
    pub sensor: Arc<dyn CameraSensor>,
    /// Service configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the core components to one shared controller link
    pub fn new(
        config: Arc<Config>,
        link: SharedLink,
        source: Arc<dyn FrameSource>,
        sensor: Arc<dyn CameraSensor>,
    ) -> Self {
        let codec = CommandCodec::new(config.link.ack_policy);
        let dispatcher = ActionDispatcher::new(link.clone(), codec, config.dispatcher());
        let pose = PoseQueryBridge::new(link, codec, config.link.pose_timeout())
            .with_json_validation(config.api.validate_pose_json);
        let relay = StreamRelay::new(source, JpegEncoder::new(config.camera.jpeg_quality));

        Self {
            dispatcher,
            pose,
            relay,
            sensor,
            config,
        }
    }
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the HTTP API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_redirect))
        .route("/ui", get(ui::index))
        // Camera
        .route("/capture", get(camera::capture))
        .route("/stream", get(camera::stream))
        .route("/control", get(camera::control))
        .route("/status", get(camera::status))
        // Controller
        .route("/api/path", post(commands::submit_path))
        .route("/api/pose", get(commands::query_pose))
        .route("/health", get(health_check))
        // Middleware
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router for the dedicated stream listener
pub fn build_stream_router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(camera::stream))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_redirect() -> Redirect {
    Redirect::temporary("/ui")
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Error response body for structured error responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type (e.g., "payload", "timeout", "camera")
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error_type: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error_type: error_type.to_string(),
            message: message.into(),
        }),
    )
}

/// Map core errors to HTTP status codes and structured responses
pub fn map_core_error(e: Error) -> ApiError {
    let (status, error_type) = match &e {
        Error::InvalidPayload(_) | Error::PayloadTooLarge { .. } | Error::InvalidAction(_) => {
            (StatusCode::BAD_REQUEST, "payload")
        }
        Error::LinkTimeout { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "timeout"),
        Error::Parse(_) => (StatusCode::INTERNAL_SERVER_ERROR, "parse"),
        Error::CaptureFailure(_) | Error::EncodeFailure(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "camera")
        }
        Error::Sensor { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "sensor"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    api_error(status, error_type, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let (status, body) = map_core_error(Error::InvalidPayload("bad payload".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error_type, "payload");

        let (status, body) = map_core_error(Error::LinkTimeout {
            correlation_id: "p1234".into(),
            timeout_ms: 3000,
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error_type, "timeout");
        assert!(body.message.contains("p1234"));

        let (status, _) = map_core_error(Error::Sensor {
            name: "quality".into(),
            value: 99,
            reason: "expected 0..=63".into(),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
