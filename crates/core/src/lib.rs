//! RoverCam Core - command bridge and MJPEG relay
//!
//! This crate holds everything between the HTTP surface and the hardware:
//!
//! - [`link`]: the byte-oriented link to the motor controller and the
//!   mutually-exclusive [`SharedLink`] handle every exchange goes through
//! - [`codec`]: action <-> wire frame translation and acknowledgment policy
//! - [`action`] / [`dispatcher`]: request body parsing and batch execution
//! - [`pose`]: the pose query round trip
//! - [`frame`], [`encoder`], [`relay`]: camera frames, JPEG encoding and the
//!   `multipart/x-mixed-replace` stream loop
//! - [`sensor`]: runtime camera sensor parameters
//!
//! # Example
//!
//! ```
//! use rovercam_core::{ActionDispatcher, CommandCodec, DispatcherConfig, LinkTiming, MockTransport, SharedLink};
//!
//! # tokio_test::block_on(async {
//! let link = SharedLink::new(MockTransport::simulated(), LinkTiming::default());
//! let dispatcher = ActionDispatcher::new(link, CommandCodec::default(), DispatcherConfig::default());
//!
//! let result = dispatcher.dispatch(br#"{"cmd":"move","d":0.5,"dir":1,"id":"m1"}"#).await?;
//! assert_eq!(serde_json::to_string(&result)?, r#"{"acks":["m1_ok"]}"#);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

#![warn(clippy::all)]

pub mod action;
pub mod codec;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod link;
pub mod pose;
pub mod relay;
pub mod sensor;

pub use action::{parse_batch, Action, ActionKind, Command, CorrelationIds, Direction};
pub use codec::{AckPolicy, CommandCodec, WireFrame};
pub use dispatcher::{AckEntry, ActionDispatcher, BatchResult, DispatcherConfig};
pub use encoder::{EncodedFrame, JpegEncoder};
pub use error::{Error, Result};
pub use frame::{Frame, FrameSource, PixelFormat, TestPatternSource};
pub use link::{LinkTiming, MockTransport, SharedLink, Transport};
#[cfg(feature = "serial")]
pub use link::SerialTransport;
pub use pose::{PoseQueryBridge, PoseReply};
pub use relay::{ChunkSink, SessionSummary, StreamRelay, STREAM_CONTENT_TYPE};
pub use sensor::{CameraSensor, SensorStatus, SimulatedSensor};
