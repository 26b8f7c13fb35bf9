//! JPEG encoding for raw camera frames
//!
//! Frames that are already JPEG are never re-encoded: [`EncodedFrame::Borrowed`]
//! keeps the source frame alive (its `Bytes` are shared, not copied) until the
//! caller hands it back with [`EncodedFrame::release`].

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ExtendedColorType;

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameSource, PixelFormat};

/// Default JPEG quality for converted frames
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// JPEG payload ready to be sent
#[derive(Debug)]
pub enum EncodedFrame {
    /// The captured frame was already JPEG; still owned by the source's pool
    Borrowed(Frame),
    /// Newly allocated JPEG buffer; the captured frame was already released
    Owned(Bytes),
}

impl EncodedFrame {
    pub fn bytes(&self) -> &Bytes {
        match self {
            EncodedFrame::Borrowed(frame) => &frame.data,
            EncodedFrame::Owned(bytes) => bytes,
        }
    }

    /// Return a borrowed frame to `source`, or free the owned buffer
    pub fn release(self, source: &dyn FrameSource) {
        match self {
            EncodedFrame::Borrowed(frame) => source.recycle(frame),
            EncodedFrame::Owned(bytes) => drop(bytes),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: u8,
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl JpegEncoder {
    /// `quality` is clamped to 1..=100
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Turn a captured frame into a JPEG payload.
    ///
    /// Raw frames are compressed and handed back to `source` right away,
    /// whether or not compression succeeded.
    pub fn prepare(&self, frame: Frame, source: &dyn FrameSource) -> Result<EncodedFrame> {
        if frame.is_jpeg() {
            return Ok(EncodedFrame::Borrowed(frame));
        }
        let encoded = self.encode_raw(&frame.data, frame.width, frame.height, frame.format);
        source.recycle(frame);
        encoded.map(EncodedFrame::Owned)
    }

    /// Compress a raw pixel buffer
    pub fn encode_raw(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Bytes> {
        let (color, bytes_per_pixel) = match format {
            PixelFormat::Rgb888 => (ExtendedColorType::Rgb8, 3),
            PixelFormat::Grayscale => (ExtendedColorType::L8, 1),
            PixelFormat::Jpeg => {
                return Err(Error::EncodeFailure(
                    "frame is already JPEG".to_string(),
                ))
            }
        };

        let expected = width as usize * height as usize * bytes_per_pixel;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(Error::EncodeFailure(format!(
                "{}x{} {:?} frame needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                pixels.len()
            )));
        }

        let mut out = Vec::with_capacity(expected / 8);
        ImageJpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(pixels, width, height, color)
            .map_err(|e| Error::EncodeFailure(e.to_string()))?;
        Ok(Bytes::from(out))
    }
}
