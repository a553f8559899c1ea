//! Raw input frames

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::encoder::{EncoderError, EncoderResult};

/// Pixel layout of a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0
    I420,
    /// Semi-planar YUV 4:2:0
    Nv12,
    /// Packed 32-bit BGRA
    Bgra,
    /// Opaque GPU texture/surface handle; the payload carries the handle
    NativeHandle,
}

impl PixelFormat {
    /// Expected payload size for a frame of this format
    ///
    /// Returns `None` for native handles, whose payload is opaque.
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width as usize, height as usize);
        match self {
            Self::I420 | Self::Nv12 => {
                let chroma = w.div_ceil(2) * h.div_ceil(2);
                Some(w * h + 2 * chroma)
            }
            Self::Bgra => Some(w * h * 4),
            Self::NativeHandle => None,
        }
    }
}

/// Frame type requested for the upcoming encode call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoFrameType {
    /// Skip this stream for the current frame
    Empty,
    /// Encode a key frame
    Key,
    /// Delta frame allowed
    #[default]
    Delta,
}

/// A raw picture handed to `VideoEncoder::encode`
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// RTP timestamp (90 kHz clock)
    pub rtp_timestamp: u32,
    /// Capture wall-clock time in milliseconds
    pub capture_time_ms: i64,
    pub data: Bytes,
}

impl VideoFrame {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        rtp_timestamp: u32,
        data: Bytes,
    ) -> Self {
        Self {
            width,
            height,
            format,
            rtp_timestamp,
            capture_time_ms: 0,
            data,
        }
    }

    pub fn with_capture_time(mut self, capture_time_ms: i64) -> Self {
        self.capture_time_ms = capture_time_ms;
        self
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Check dimensions and payload size against the pixel format
    pub fn validate(&self) -> EncoderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EncoderError::InvalidParameter(format!(
                "frame has empty dimensions {}x{}",
                self.width, self.height
            )));
        }

        match self.format.frame_size(self.width, self.height) {
            Some(expected) if self.data.len() < expected => {
                Err(EncoderError::InvalidParameter(format!(
                    "{:?} frame {}x{} needs {} bytes, got {}",
                    self.format,
                    self.width,
                    self.height,
                    expected,
                    self.data.len()
                )))
            }
            None if self.data.is_empty() => Err(EncoderError::InvalidParameter(
                "native handle frame without handle payload".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i420_frame_size() {
        assert_eq!(PixelFormat::I420.frame_size(320, 180), Some(320 * 180 * 3 / 2));
        // odd dimensions round chroma up
        assert_eq!(PixelFormat::Nv12.frame_size(3, 3), Some(9 + 2 * 4));
        assert_eq!(PixelFormat::Bgra.frame_size(2, 2), Some(16));
        assert_eq!(PixelFormat::NativeHandle.frame_size(1920, 1080), None);
    }

    #[test]
    fn test_validate_short_payload() {
        let frame = VideoFrame::new(4, 4, PixelFormat::I420, 0, Bytes::from(vec![0u8; 10]));
        assert!(matches!(frame.validate(), Err(EncoderError::InvalidParameter(_))));

        let frame = VideoFrame::new(4, 4, PixelFormat::I420, 0, Bytes::from(vec![0u8; 24]));
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_validate_native_handle() {
        let frame = VideoFrame::new(1920, 1080, PixelFormat::NativeHandle, 0, Bytes::new());
        assert!(frame.validate().is_err());

        let frame = VideoFrame::new(
            1920,
            1080,
            PixelFormat::NativeHandle,
            0,
            Bytes::from_static(&[7]),
        );
        assert!(frame.validate().is_ok());
    }
}
