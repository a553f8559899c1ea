//! Encoded-result channel
//!
//! Backends hand every encoded layer, or a drop notification, back to the
//! pipeline through an `EncodedImageCallback`. The callback may run on the
//! thread that called `encode()` (software backend) or on a backend
//! worker thread (hardware backend), so implementations are `Send + Sync`
//! and must tolerate concurrent `encode()`/`set_rates()` calls.
//!
//! # Architecture
//!
//! ```text
//!  VideoEncoder ──on_encoded_image()──> ChannelCallback ──EncoderEvent──> EncodedFrameReceiver
//!       ▲                                     │                              (pipeline)
//!       └────── CallbackResult ◄──────────────┘
//!               (frame id, drop_next_frame)
//! ```
//!
//! # Guarantees a backend gives
//!
//! - at most one `on_encoded_image()` per submitted frame and layer,
//!   issued only after the matching `encode()` call started
//! - per (spatial, temporal) layer, results arrive in submission order
//! - `SendFailed` results are logged, never fatal
//! - a result with `drop_next_frame` makes the very next submitted frame
//!   a `DroppedByMediaOptimizations` drop instead of an encoded image

mod channel;
mod order;

pub use channel::{encoded_channel, ChannelCallback, EncodedFrameReceiver, EncoderEvent};
pub use order::LayerOrderMonitor;

use crate::codec::{CodecSpecificInfo, EncodedImage, FragmentationHeader};

/// Outcome of delivering one encoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResultError {
    Ok,
    /// The downstream consumer failed to send the frame
    SendFailed,
}

/// What the pipeline tells the backend after receiving an encoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackResult {
    pub error: CallbackResultError,

    /// Identifier the receiver will see for this frame (the RTP timestamp
    /// when sent over RTP). Only meaningful when `error` is `Ok`.
    pub frame_id: u32,

    /// Skip the next submitted frame
    pub drop_next_frame: bool,
}

impl CallbackResult {
    pub fn ok(frame_id: u32) -> Self {
        Self {
            error: CallbackResultError::Ok,
            frame_id,
            drop_next_frame: false,
        }
    }

    pub fn send_failed() -> Self {
        Self {
            error: CallbackResultError::SendFailed,
            frame_id: 0,
            drop_next_frame: false,
        }
    }

    pub fn with_drop_next_frame(mut self, drop_next_frame: bool) -> Self {
        self.drop_next_frame = drop_next_frame;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error == CallbackResultError::Ok
    }
}

/// Why a frame produced no encoded image. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Dropped by the pipeline's media optimizations (rate limiting)
    DroppedByMediaOptimizations,
    /// Dropped by the encoder's internal rate limiter
    DroppedByEncoder,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DroppedByMediaOptimizations => write!(f, "media-optimizations"),
            Self::DroppedByEncoder => write!(f, "encoder"),
        }
    }
}

/// Receiver of encoded output
pub trait EncodedImageCallback: Send + Sync {
    /// Called once per encoded layer of a submitted frame
    fn on_encoded_image(
        &self,
        image: &EncodedImage,
        codec_specific_info: Option<&CodecSpecificInfo>,
        fragmentation: Option<&FragmentationHeader>,
    ) -> CallbackResult;

    /// Called instead of `on_encoded_image()` when a frame is dropped
    fn on_dropped_frame(&self, _reason: DropReason) {}
}
