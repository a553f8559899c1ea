//! Passthrough backend
//!
//! Emits the raw input as a single-layer "encoded" image. Useful for
//! exercising the pipeline without a codec, and the only backend that
//! still speaks the oldest rate call (total kbps plus integer framerate),
//! so it also exercises the full translation chain.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::callback::{DropReason, EncodedImageCallback};
use crate::codec::{
    CodecSpecificInfo, EncodedImage, FragmentationHeader, VideoCodec, VideoFrame, VideoFrameType,
};
use crate::encoder::{
    EncoderError, EncoderInfo, EncoderResult, EncoderState, Lifecycle, RateProtocol, VideoEncoder,
};

use super::model::validate_frame_types;
use super::stats::{EncodeTimer, EncoderStats};

pub const PASSTHROUGH_IMPLEMENTATION_NAME: &str = "passthrough";

pub struct PassthroughEncoder {
    lifecycle: Lifecycle,
    callback: Option<Arc<dyn EncodedImageCallback>>,
    /// (kbps, fps) from the last rate call; fps 0 already replaced by the init max
    rates: Option<(u32, u32)>,
    frames_since_init: u64,
    drop_next_frame: bool,
    stats: EncoderStats,
}

impl PassthroughEncoder {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new("passthrough"),
            callback: None,
            rates: None,
            frames_since_init: 0,
            drop_next_frame: false,
            stats: EncoderStats::new("passthrough", 0),
        }
    }

    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }

    /// Last applied `(bitrate_kbps, framerate)`
    pub fn last_rates(&self) -> Option<(u32, u32)> {
        self.rates
    }
}

impl Default for PassthroughEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for PassthroughEncoder {
    fn init_encode(
        &mut self,
        settings: &VideoCodec,
        number_of_cores: u32,
        max_payload_size: usize,
    ) -> EncoderResult<()> {
        self.lifecycle
            .check_init(settings, number_of_cores, max_payload_size)?;
        self.lifecycle
            .mark_initialized(settings.clone(), number_of_cores, max_payload_size);

        self.rates = Some((settings.start_bitrate_kbps, settings.max_framerate));
        self.frames_since_init = 0;
        self.drop_next_frame = false;
        self.stats = EncoderStats::new("passthrough", settings.start_bitrate_kbps);
        info!("Passthrough encoder initialized: {}x{}", settings.width, settings.height);
        Ok(())
    }

    fn register_encode_complete_callback(
        &mut self,
        callback: Arc<dyn EncodedImageCallback>,
    ) -> EncoderResult<()> {
        self.callback = Some(callback);
        Ok(())
    }

    fn release(&mut self) -> EncoderResult<()> {
        if self.lifecycle.mark_released() {
            self.rates = None;
            debug!("Passthrough encoder released: {}", self.stats.summary());
        }
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        frame_types: Option<&[VideoFrameType]>,
    ) -> EncoderResult<()> {
        let params = self.lifecycle.params()?;
        let codec_type = params.settings.codec_type;
        let max_payload_size = params.max_payload_size;
        let callback = self.callback.clone().ok_or(EncoderError::NotInitialized)?;
        frame.validate()?;
        validate_frame_types(frame_types, 1)?;

        if self.drop_next_frame {
            self.drop_next_frame = false;
            self.stats
                .record_drop(DropReason::DroppedByMediaOptimizations);
            callback.on_dropped_frame(DropReason::DroppedByMediaOptimizations);
            return Ok(());
        }

        let requested = frame_types
            .and_then(|types| types.first())
            .copied()
            .unwrap_or_default();
        if requested == VideoFrameType::Empty || matches!(self.rates, Some((0, _))) {
            debug!("Passthrough skipping rtp_timestamp={}", frame.rtp_timestamp);
            return Ok(());
        }

        let timer = EncodeTimer::start();
        let is_key = self.frames_since_init == 0 || requested == VideoFrameType::Key;
        let image = EncodedImage {
            data: frame.data.clone(),
            encoded_width: frame.width,
            encoded_height: frame.height,
            rtp_timestamp: frame.rtp_timestamp,
            capture_time_ms: frame.capture_time_ms,
            frame_type: if is_key {
                VideoFrameType::Key
            } else {
                VideoFrameType::Delta
            },
            qp: None,
            spatial_index: None,
        };
        let info = CodecSpecificInfo {
            codec_type,
            temporal_index: 0,
            spatial_index: 0,
            end_of_picture: true,
            layer_sync: false,
        };
        let fragmentation = (image.size() > max_payload_size)
            .then(|| FragmentationHeader::split(image.size(), max_payload_size));

        self.frames_since_init += 1;
        self.stats
            .record_frame(timer.elapsed_ms(), 1, image.size(), is_key);

        let result = callback.on_encoded_image(&image, Some(&info), fragmentation.as_ref());
        if !result.is_ok() {
            self.stats.record_send_failure();
            warn!(
                "Callback failed to accept rtp_timestamp={}, continuing",
                frame.rtp_timestamp
            );
        }
        self.drop_next_frame = result.drop_next_frame;
        Ok(())
    }

    fn rate_protocol(&self) -> RateProtocol {
        RateProtocol::Legacy
    }

    fn set_rates_legacy(&mut self, bitrate_kbps: u32, framerate: u32) -> EncoderResult<()> {
        let params = self.lifecycle.params()?;
        let framerate = if framerate == 0 {
            params.settings.max_framerate
        } else {
            framerate
        };
        self.rates = Some((bitrate_kbps, framerate));
        self.stats.set_target_bitrate_kbps(bitrate_kbps);
        Ok(())
    }

    fn encoder_info(&self) -> EncoderInfo {
        EncoderInfo {
            implementation_name: PASSTHROUGH_IMPLEMENTATION_NAME.to_string(),
            ..EncoderInfo::default()
        }
    }

    fn state(&self) -> EncoderState {
        self.lifecycle.state()
    }
}
