//! RoverCam HTTP front end
//!
//! Serves the motion command API, pose queries, the MJPEG stream and camera
//! controls on top of `rovercam-core`.
//!
//! ```text
//!   HTTP clients
//!        │
//!        ▼
//!  ┌─────────────┐   /api/path   ┌──────────────────┐
//!  │  axum API   │──────────────▶│ ActionDispatcher │──┐
//!  │             │   /api/pose   ├──────────────────┤  │  SharedLink
//!  │             │──────────────▶│ PoseQueryBridge  │──┼──────────────▶ controller
//!  │             │               └──────────────────┘  │  (one exchange
//!  │             │   /stream     ┌──────────────────┐     at a time)
//!  │             │──────────────▶│   StreamRelay    │◀── FrameSource
//!  └─────────────┘   /capture    └──────────────────┘
//! ```

pub mod api;
pub mod config;
