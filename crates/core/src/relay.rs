//! MJPEG stream relay
//!
//! Drives one `multipart/x-mixed-replace` response:
//!
//! ```text
//! Idle -> Capturing -> Encoding -> Emitting -> Capturing -> ...
//!              \            \           \
//!               +------------+-----------+--> Closed
//! ```
//!
//! Each part is written as three chunks (part header, JPEG payload, boundary).
//! The first failure of any step closes the session; nothing is retried and a
//! part is never started for a frame that failed to capture or encode.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::encoder::{EncodedFrame, JpegEncoder};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameSource};

/// Multipart boundary token
pub const PART_BOUNDARY: &str = "123456789000000000000987654321";

/// Content type of the stream response
pub const STREAM_CONTENT_TYPE: &str =
    "multipart/x-mixed-replace;boundary=123456789000000000000987654321";

/// Boundary marker written after every part
pub const STREAM_BOUNDARY: &str = "\r\n--123456789000000000000987654321\r\n";

/// Header preceding each JPEG payload
pub fn part_header(content_length: usize) -> String {
    format!(
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        content_length
    )
}

/// Item type of a streamed response body
pub type BodyChunk = std::result::Result<Bytes, std::io::Error>;

/// Receiving end of the stream, usually the HTTP response body
#[async_trait]
pub trait ChunkSink: Send {
    /// Write one chunk; an error means the client is gone
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()>;

    /// Signal a transport-level failure so the connection is torn down
    async fn abort(&mut self, _error: &Error) {}
}

#[async_trait]
impl ChunkSink for mpsc::Sender<BodyChunk> {
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.send(Ok(chunk))
            .await
            .map_err(|_| Error::SendFailure("client disconnected".to_string()))
    }

    async fn abort(&mut self, error: &Error) {
        let _ = self
            .send(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                error.to_string(),
            )))
            .await;
    }
}

/// Where a stream session currently is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Capturing,
    Encoding,
    Emitting,
    Closed,
}

/// Per-connection state of one stream
#[derive(Debug)]
pub struct StreamSession {
    state: RelayState,
    started: Instant,
    last_frame: Option<Instant>,
    frames_emitted: u64,
}

impl StreamSession {
    fn new() -> Self {
        Self {
            state: RelayState::Idle,
            started: Instant::now(),
            last_frame: None,
            frames_emitted: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    fn transition(&mut self, next: RelayState) {
        tracing::trace!(from = ?self.state, to = ?next, "Relay state");
        self.state = next;
    }

    fn frame_emitted(&mut self, bytes: usize) {
        let now = Instant::now();
        let frame_time = now - self.last_frame.unwrap_or(self.started);
        self.last_frame = Some(now);
        self.frames_emitted += 1;
        tracing::trace!(
            frame = self.frames_emitted,
            bytes,
            elapsed_ms = frame_time.as_millis() as u64,
            "MJPG part sent"
        );
    }
}

/// How a stream session ended
#[derive(Debug)]
pub struct SessionSummary {
    pub frames_emitted: u64,
    pub duration: Duration,
    pub error: Error,
}

/// Capture/encode/emit loop shared by every stream connection
#[derive(Clone)]
pub struct StreamRelay {
    source: Arc<dyn FrameSource>,
    encoder: JpegEncoder,
}

impl StreamRelay {
    pub fn new(source: Arc<dyn FrameSource>, encoder: JpegEncoder) -> Self {
        Self { source, encoder }
    }

    pub fn source(&self) -> &dyn FrameSource {
        self.source.as_ref()
    }

    /// Run one session until the first failure
    pub async fn run<S>(&self, sink: &mut S) -> SessionSummary
    where
        S: ChunkSink + ?Sized,
    {
        let mut session = StreamSession::new();
        tracing::info!("Stream session started");

        let error = loop {
            if let Err(e) = self.iterate(&mut session, sink).await {
                break e;
            }
        };
        session.transition(RelayState::Closed);

        let summary = SessionSummary {
            frames_emitted: session.frames_emitted(),
            duration: session.started.elapsed(),
            error,
        };
        tracing::info!(
            frames = summary.frames_emitted,
            duration_ms = summary.duration.as_millis() as u64,
            "Stream session closed: {}",
            summary.error
        );
        summary
    }

    async fn iterate<S>(&self, session: &mut StreamSession, sink: &mut S) -> Result<()>
    where
        S: ChunkSink + ?Sized,
    {
        session.transition(RelayState::Capturing);
        let frame = match self.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Camera capture failed: {}", e);
                sink.abort(&e).await;
                return Err(e);
            }
        };

        session.transition(RelayState::Encoding);
        let encoded = match self.encode(frame).await {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("JPEG compression failed: {}", e);
                sink.abort(&e).await;
                return Err(e);
            }
        };

        session.transition(RelayState::Emitting);
        let len = encoded.bytes().len();
        let sent = emit_part(sink, encoded.bytes()).await;
        encoded.release(self.source());
        sent?;

        session.frame_emitted(len);
        Ok(())
    }

    /// Grab one frame on the blocking pool
    pub async fn capture(&self) -> Result<Frame> {
        let source = self.source.clone();
        tokio::task::spawn_blocking(move || source.capture())
            .await
            .map_err(|e| Error::CaptureFailure(format!("capture task failed: {}", e)))?
    }

    /// Make a JPEG payload out of `frame`, compressing on the blocking pool if needed
    pub async fn encode(&self, frame: Frame) -> Result<EncodedFrame> {
        if frame.is_jpeg() {
            return Ok(EncodedFrame::Borrowed(frame));
        }
        let source = self.source.clone();
        let encoder = self.encoder;
        tokio::task::spawn_blocking(move || encoder.prepare(frame, source.as_ref()))
            .await
            .map_err(|e| Error::EncodeFailure(format!("encode task failed: {}", e)))?
    }

    /// One JPEG still, as served by the capture endpoint
    pub async fn capture_jpeg(&self) -> Result<EncodedFrame> {
        let frame = self.capture().await?;
        self.encode(frame).await
    }
}

async fn emit_part<S>(sink: &mut S, payload: &Bytes) -> Result<()>
where
    S: ChunkSink + ?Sized,
{
    sink.send_chunk(Bytes::from(part_header(payload.len())))
        .await?;
    sink.send_chunk(payload.clone()).await?;
    sink.send_chunk(Bytes::from_static(STREAM_BOUNDARY.as_bytes()))
        .await
}
