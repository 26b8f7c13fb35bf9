//! Camera frames and frame sources

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::encoder::JpegEncoder;
use crate::error::{Error, Result};

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Already-compressed JPEG
    Jpeg,
    /// Packed 8-bit RGB
    Rgb888,
    /// 8-bit luminance
    Grayscale,
}

/// One image buffer as produced by a [`FrameSource`]
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub timestamp: SystemTime,
}

impl Frame {
    pub fn is_jpeg(&self) -> bool {
        self.format == PixelFormat::Jpeg
    }
}

/// Source of camera frames, shared read-only by all capture and stream requests
pub trait FrameSource: Send + Sync {
    /// Grab one frame
    fn capture(&self) -> Result<Frame>;

    /// Return a frame obtained from [`FrameSource::capture`] to the source's pool
    fn recycle(&self, frame: Frame) {
        drop(frame);
    }
}

/// Synthetic colour-bar source for hardware-free runs and tests
pub struct TestPatternSource {
    width: u32,
    height: u32,
    format: PixelFormat,
    encoder: JpegEncoder,
    fail_from: Option<u64>,
    captured: AtomicU64,
    recycled: AtomicU64,
}

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [16, 16, 16],
];

impl TestPatternSource {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            encoder: JpegEncoder::default(),
            fail_from: None,
            captured: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
        }
    }

    /// Fail every capture from the `n`-th (0-based) onwards
    pub fn failing_from(mut self, n: u64) -> Self {
        self.fail_from = Some(n);
        self
    }

    /// Number of capture attempts so far
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// Number of frames handed back through [`FrameSource::recycle`]
    pub fn recycled(&self) -> u64 {
        self.recycled.load(Ordering::Relaxed)
    }

    fn render_rgb(&self, offset: u32) -> Vec<u8> {
        let (width, height) = (self.width as usize, self.height as usize);
        let bar_width = (width / BARS.len()).max(1);
        let mut pixels = Vec::with_capacity(width * height * 3);
        for _ in 0..height {
            for x in 0..width {
                let bar = ((x + offset as usize) / bar_width) % BARS.len();
                pixels.extend_from_slice(&BARS[bar]);
            }
        }
        pixels
    }
}

impl FrameSource for TestPatternSource {
    fn capture(&self) -> Result<Frame> {
        let index = self.captured.fetch_add(1, Ordering::Relaxed);
        if self.fail_from.is_some_and(|n| index >= n) {
            return Err(Error::CaptureFailure(format!("no frame for capture #{}", index)));
        }

        let offset = (index % u64::from(self.width.max(1))) as u32;
        let rgb = self.render_rgb(offset);
        let data = match self.format {
            PixelFormat::Rgb888 => Bytes::from(rgb),
            PixelFormat::Grayscale => Bytes::from(
                rgb.chunks_exact(3)
                    .map(|p| ((u16::from(p[0]) + u16::from(p[1]) + u16::from(p[2])) / 3) as u8)
                    .collect::<Vec<u8>>(),
            ),
            PixelFormat::Jpeg => {
                self.encoder
                    .encode_raw(&rgb, self.width, self.height, PixelFormat::Rgb888)?
            }
        };

        Ok(Frame {
            data,
            format: self.format,
            width: self.width,
            height: self.height,
            timestamp: SystemTime::now(),
        })
    }

    fn recycle(&self, frame: Frame) {
        self.recycled.fetch_add(1, Ordering::Relaxed);
        drop(frame);
    }
}
