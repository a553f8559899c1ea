//! Synchronous software backend
//!
//! Encodes inside `encode()` and invokes the callback before returning.
//! Implements the per-layer `set_rate_allocation` call; structured
//! parameters reach it through the default translation, losing the
//! bandwidth headroom.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::callback::{DropReason, EncodedImageCallback};
use crate::codec::{VideoBitrateAllocation, VideoCodec, VideoFrame, VideoFrameType};
use crate::encoder::{
    EncoderError, EncoderInfo, EncoderResult, EncoderState, FpsAllocation, Lifecycle, RateProtocol,
    ScalingSettings, VideoEncoder,
};

use super::model::{fps_allocation_for, validate_frame_types, LayerModel};
use super::stats::{EncodeTimer, EncoderStats};

pub const SOFTWARE_IMPLEMENTATION_NAME: &str = "software-reference";

/// Reference software encoder
pub struct SoftwareEncoder {
    lifecycle: Lifecycle,
    scaling: ScalingSettings,
    callback: Option<Arc<dyn EncodedImageCallback>>,
    model: Option<LayerModel>,
    fps_allocation: FpsAllocation,
    drop_next_frame: bool,
    stats: EncoderStats,
}

impl SoftwareEncoder {
    /// Create an encoder advertising `scaling` to the quality scaler
    pub fn new(scaling: ScalingSettings) -> Self {
        Self {
            lifecycle: Lifecycle::new("software"),
            scaling,
            callback: None,
            model: None,
            fps_allocation: FpsAllocation::default(),
            drop_next_frame: false,
            stats: EncoderStats::new("software", 0),
        }
    }

    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }

    /// Framerate the encoder is currently targeting, if initialized
    pub fn target_framerate(&self) -> Option<f64> {
        self.model.as_ref().map(LayerModel::framerate)
    }

    fn deliver(
        &mut self,
        frame: &VideoFrame,
        frame_types: Option<&[VideoFrameType]>,
        callback: &dyn EncodedImageCallback,
    ) -> EncoderResult<()> {
        let model = self.model.as_mut().ok_or(EncoderError::NotInitialized)?;

        let timer = EncodeTimer::start();
        let picture = model.encode(frame, frame_types);
        if picture.is_empty() {
            debug!(
                "Frame rtp_timestamp={} produced no layers (all skipped)",
                frame.rtp_timestamp
            );
            return Ok(());
        }
        self.stats.record_frame(
            timer.elapsed_ms(),
            picture.layers.len(),
            picture.bytes(),
            picture.is_key,
        );

        for layer in &picture.layers {
            let result = callback.on_encoded_image(
                &layer.image,
                Some(&layer.info),
                layer.fragmentation.as_ref(),
            );
            if !result.is_ok() {
                self.stats.record_send_failure();
                warn!(
                    "Callback failed to accept S{}T{} rtp_timestamp={}, continuing",
                    layer.info.spatial_index, layer.info.temporal_index, layer.image.rtp_timestamp
                );
            }
            if result.drop_next_frame {
                self.drop_next_frame = true;
            }
        }
        Ok(())
    }
}

impl Default for SoftwareEncoder {
    fn default() -> Self {
        Self::new(ScalingSettings::new(24, 37))
    }
}

impl VideoEncoder for SoftwareEncoder {
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

        let params = self.lifecycle.params()?;
        let model = LayerModel::new(params);
        self.stats = EncoderStats::new("software", model.allocation().sum_kbps());
        self.model = Some(model);
        self.fps_allocation = fps_allocation_for(settings);
        self.drop_next_frame = false;

        info!(
            "Software encoder initialized: {} {}x{}, {} layer(s), {} cores",
            settings.codec_type,
            settings.width,
            settings.height,
            settings.layers().len(),
            number_of_cores
        );
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
        if !self.lifecycle.mark_released() {
            return Ok(());
        }
        self.model = None;
        info!("Software encoder released: {}", self.stats.summary());
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        frame_types: Option<&[VideoFrameType]>,
    ) -> EncoderResult<()> {
        self.lifecycle.params()?;
        let callback = self.callback.clone().ok_or(EncoderError::NotInitialized)?;
        frame.validate()?;
        validate_frame_types(
            frame_types,
            self.model.as_ref().map_or(1, LayerModel::layer_count),
        )?;

        if self.drop_next_frame {
            self.drop_next_frame = false;
            self.stats
                .record_drop(DropReason::DroppedByMediaOptimizations);
            debug!("Dropping frame rtp_timestamp={} on request", frame.rtp_timestamp);
            callback.on_dropped_frame(DropReason::DroppedByMediaOptimizations);
            return Ok(());
        }

        self.deliver(frame, frame_types, callback.as_ref())
    }

    fn rate_protocol(&self) -> RateProtocol {
        RateProtocol::Allocation
    }

    fn set_rate_allocation(
        &mut self,
        allocation: &VideoBitrateAllocation,
        framerate: u32,
    ) -> EncoderResult<()> {
        let model = self.model.as_mut().ok_or(EncoderError::NotInitialized)?;
        let effective = model.set_rates(allocation, framerate as f64);
        self.stats.set_target_bitrate_kbps(allocation.sum_kbps());
        debug!(
            "Software rates: {} kbps at {} fps (requested {})",
            allocation.sum_kbps(),
            effective,
            framerate
        );
        Ok(())
    }

    fn encoder_info(&self) -> EncoderInfo {
        EncoderInfo {
            scaling_settings: self.scaling,
            implementation_name: SOFTWARE_IMPLEMENTATION_NAME.to_string(),
            fps_allocation: self.fps_allocation.clone(),
            ..EncoderInfo::default()
        }
    }

    fn state(&self) -> EncoderState {
        self.lifecycle.state()
    }
}
