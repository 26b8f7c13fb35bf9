//! Configuration for the RoverCam server
//!
//! Configuration can be loaded from a TOML file and/or environment variables.

use std::path::Path;
use std::time::Duration;

use rovercam_core::codec::AckPolicy;
use rovercam_core::dispatcher::{DispatcherConfig, DEFAULT_MAX_BODY_BYTES};
use rovercam_core::encoder::DEFAULT_JPEG_QUALITY;
use rovercam_core::frame::PixelFormat;
use rovercam_core::link::LinkTiming;
use serde::{Deserialize, Serialize};

/// Main configuration for the RoverCam server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Controller link configuration
    #[serde(default)]
    pub link: LinkConfig,

    /// Command API limits
    #[serde(default)]
    pub api: ApiConfig,

    /// Camera configuration
    #[serde(default)]
    pub camera: CameraConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port for the API, UI and stream
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Optional extra port serving only `/stream`
    #[serde(default)]
    pub stream_port: Option<u16>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            stream_port: None,
        }
    }
}

/// Controller link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial device path
    #[serde(default = "default_device")]
    pub device: String,

    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Wait for a move/turn acknowledgment
    #[serde(default = "default_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Wait for a pose reply
    #[serde(default = "default_timeout_ms")]
    pub pose_timeout_ms: u64,

    /// Interval between "bytes available?" checks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Quiet gap that ends a reply
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// How replies are accepted as acknowledgments
    #[serde(default)]
    pub ack_policy: AckPolicy,

    /// Talk to the in-process simulated controller instead of a serial port
    #[serde(default)]
    pub mock: bool,
}

fn default_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_settle_ms() -> u64 {
    20
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            ack_timeout_ms: default_timeout_ms(),
            pose_timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
            ack_policy: AckPolicy::default(),
            mock: false,
        }
    }
}

impl LinkConfig {
    pub fn timing(&self) -> LinkTiming {
        LinkTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            settle: Duration::from_millis(self.settle_ms),
        }
    }

    pub fn pose_timeout(&self) -> Duration {
        Duration::from_millis(self.pose_timeout_ms)
    }
}

/// Command API limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Largest accepted `/api/path` body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Fail `/api/pose` when the controller reply is not a JSON object
    #[serde(default)]
    pub validate_pose_json: bool,
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            validate_pose_json: false,
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// JPEG quality for raw frames (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Pixel format delivered by the frame source
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
}

fn default_width() -> u32 {
    320
}

fn default_height() -> u32 {
    240
}

fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_pixel_format() -> PixelFormat {
    PixelFormat::Rgb888
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            jpeg_quality: default_jpeg_quality(),
            pixel_format: default_pixel_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Config::default();

        // Server
        if let Ok(host) = std::env::var("ROVERCAM_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("ROVERCAM_HTTP_PORT") {
            if let Ok(p) = port.parse() {
                config.server.http_port = p;
            }
        }
        if let Ok(port) = std::env::var("ROVERCAM_STREAM_PORT") {
            if let Ok(p) = port.parse() {
                config.server.stream_port = Some(p);
            }
        }

        // Link
        if let Ok(device) = std::env::var("ROVERCAM_SERIAL_DEVICE") {
            config.link.device = device;
        }
        if let Ok(baud) = std::env::var("ROVERCAM_BAUD_RATE") {
            if let Ok(b) = baud.parse() {
                config.link.baud_rate = b;
            }
        }
        if let Ok(timeout) = std::env::var("ROVERCAM_ACK_TIMEOUT_MS") {
            if let Ok(t) = timeout.parse() {
                config.link.ack_timeout_ms = t;
            }
        }
        if let Ok(timeout) = std::env::var("ROVERCAM_POSE_TIMEOUT_MS") {
            if let Ok(t) = timeout.parse() {
                config.link.pose_timeout_ms = t;
            }
        }
        if let Ok(policy) = std::env::var("ROVERCAM_ACK_POLICY") {
            match policy.to_ascii_lowercase().as_str() {
                "lenient" => config.link.ack_policy = AckPolicy::Lenient,
                "correlated" => config.link.ack_policy = AckPolicy::Correlated,
                other => tracing::warn!("Ignoring unknown ROVERCAM_ACK_POLICY '{}'", other),
            }
        }
        if let Ok(mock) = std::env::var("ROVERCAM_MOCK_LINK") {
            config.link.mock = matches!(mock.as_str(), "1" | "true" | "yes");
        }

        // API
        if let Ok(max) = std::env::var("ROVERCAM_MAX_BODY_BYTES") {
            if let Ok(m) = max.parse() {
                config.api.max_body_bytes = m;
            }
        }

        // Camera
        if let Ok(quality) = std::env::var("ROVERCAM_JPEG_QUALITY") {
            if let Ok(q) = quality.parse() {
                config.camera.jpeg_quality = q;
            }
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        Ok(Self::from_env())
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            ack_timeout: Duration::from_millis(self.link.ack_timeout_ms),
            max_body_bytes: self.api.max_body_bytes,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
