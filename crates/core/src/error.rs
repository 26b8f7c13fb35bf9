//! Error types for RoverCam Core

use thiserror::Error;

/// Result type alias for RoverCam Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the command bridge and stream relay
#[derive(Debug, Error)]
pub enum Error {
    /// Request body is malformed or has an unsupported shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Request body exceeds the configured size cap (or is empty)
    #[error("Payload size {size} outside accepted range 1..={limit} bytes")]
    PayloadTooLarge {
        /// Received body size in bytes
        size: usize,
        /// Configured maximum body size in bytes
        limit: usize,
    },

    /// Action kind is unknown or its fields cannot be encoded
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// No reply arrived on the link before the deadline
    #[error("Link timeout after {timeout_ms}ms waiting for {correlation_id}")]
    LinkTimeout {
        /// Correlation id of the exchange that timed out
        correlation_id: String,
        /// Deadline that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// Reply bytes are not valid structured data
    #[error("Parse error: {0}")]
    Parse(String),

    /// Frame source produced no frame
    #[error("Capture failed: {0}")]
    CaptureFailure(String),

    /// Raw frame could not be compressed to JPEG
    #[error("Encode failed: {0}")]
    EncodeFailure(String),

    /// HTTP boundary rejected a response chunk
    #[error("Send failed: {0}")]
    SendFailure(String),

    /// Link transport failed while reading or writing
    #[error("Link error: {0}")]
    Link(String),

    /// Camera sensor rejected a parameter
    #[error("Sensor rejected {name}={value}: {reason}")]
    Sensor {
        /// Parameter name
        name: String,
        /// Requested value
        value: i32,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serial port error
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
