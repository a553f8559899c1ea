//! Encoder session: one encoder plus the pipeline-side control loop

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backends::EncoderStats;
use crate::callback::{encoded_channel, EncodedFrameReceiver, EncoderEvent};
use crate::codec::{VideoCodec, VideoFrame, VideoFrameType};
use crate::config::PipelineConfig;
use crate::encoder::{EncoderInfo, EncoderResult, RateControlParameters, VideoEncoder};
use crate::quality::{QualityScaler, ScaleDecision};

use super::{CapabilityTracker, FrameDropper};

/// Drives a `VideoEncoder` the way a send pipeline does
///
/// Results come back over [`encoded_channel`]; [`EncoderSession::poll`]
/// drains them, feeds QP to the quality scaler and bytes to the frame
/// dropper. Capabilities are re-read before every frame, so a backend
/// falling back mid-stream changes scaler thresholds and dropper state
/// on the next frame.
pub struct EncoderSession {
    encoder: Box<dyn VideoEncoder>,
    receiver: EncodedFrameReceiver,
    capabilities: CapabilityTracker,
    scaler: QualityScaler,
    dropper: FrameDropper,
    frame_dropper_enabled: bool,
    last_scale_decision: Option<ScaleDecision>,
    stats: EncoderStats,
}

impl EncoderSession {
    /// Wrap `encoder` and register the result channel with it
    pub fn new(mut encoder: Box<dyn VideoEncoder>, config: &PipelineConfig) -> EncoderResult<Self> {
        let (callback, receiver) = encoded_channel(config.channel_capacity);
        encoder.register_encode_complete_callback(Arc::new(callback))?;

        let info = encoder.encoder_info();
        Ok(Self {
            encoder,
            receiver,
            capabilities: CapabilityTracker::new(),
            scaler: QualityScaler::new(info.scaling_settings),
            dropper: FrameDropper::new(Duration::from_millis(config.drop_window_ms)),
            frame_dropper_enabled: config.frame_dropper_enabled,
            last_scale_decision: None,
            stats: EncoderStats::new("session", 0),
        })
    }

    /// Initialize the encoder
    pub fn start(
        &mut self,
        settings: &VideoCodec,
        number_of_cores: u32,
        max_payload_size: usize,
    ) -> EncoderResult<()> {
        self.encoder
            .init_encode(settings, number_of_cores, max_payload_size)?;
        self.receiver.reset_ordering();
        self.dropper.set_target(
            settings.start_bitrate_kbps as u64 * 1000,
            settings.max_framerate as f64,
        );
        self.refresh_capabilities();
        Ok(())
    }

    /// Re-read capabilities and adapt scaler and dropper to them.
    /// Returns the names of the capability fields that changed.
    pub fn refresh_capabilities(&mut self) -> Vec<&'static str> {
        let info = self.encoder.encoder_info();
        self.scaler.update_settings(info.scaling_settings);
        self.dropper
            .set_enabled(self.frame_dropper_enabled && !info.has_trusted_rate_controller);
        self.capabilities.refresh(info)
    }

    /// Latest capability snapshot, `None` before `start()`
    pub fn encoder_info(&self) -> Option<&EncoderInfo> {
        self.capabilities.current()
    }

    pub fn set_rates(&mut self, parameters: &RateControlParameters) -> EncoderResult<()> {
        self.encoder.set_rates(parameters)?;
        self.dropper
            .set_target(parameters.bitrate.sum_bps(), parameters.framerate_fps);
        self.stats
            .set_target_bitrate_kbps(parameters.bitrate.sum_kbps());
        Ok(())
    }

    pub fn on_network_feedback(&mut self, packet_loss_rate: f32, rtt_ms: i64) {
        self.encoder.on_packet_loss_rate_update(packet_loss_rate);
        self.encoder.on_rtt_update(rtt_ms);
    }

    /// Submit one frame after refreshing capabilities
    pub fn encode(
        &mut self,
        frame: &VideoFrame,
        frame_types: Option<&[VideoFrameType]>,
    ) -> EncoderResult<()> {
        self.refresh_capabilities();
        self.encoder.encode(frame, frame_types)
    }

    /// Drain delivered results and run pipeline-side adaptation on them
    pub fn poll(&mut self) -> Vec<EncoderEvent> {
        let events = self.receiver.drain();
        self.process(&events);
        events
    }

    /// Wait up to `timeout` for one result
    pub fn poll_timeout(&mut self, timeout: Duration) -> Option<EncoderEvent> {
        let event = self.receiver.recv_timeout(timeout)?;
        self.process(std::slice::from_ref(&event));
        Some(event)
    }

    fn process(&mut self, events: &[EncoderEvent]) {
        let mut picture_bytes = 0usize;
        let mut picture_layers = 0usize;
        let mut picture_key = false;

        for event in events {
            match event {
                EncoderEvent::Encoded {
                    image,
                    codec_specific_info,
                    ..
                } => {
                    picture_bytes += image.size();
                    picture_layers += 1;
                    picture_key |= image.is_key_frame();

                    let end_of_picture = codec_specific_info
                        .as_ref()
                        .map_or(true, |info| info.end_of_picture);
                    if !end_of_picture {
                        continue;
                    }

                    if let Some(qp) = image.qp {
                        let decision =
                            self.scaler
                                .on_encoded_qp(qp, image.encoded_width, image.encoded_height);
                        if decision != ScaleDecision::Hold {
                            debug!(
                                "Quality scaler: {} at {}x{} (qp {})",
                                decision, image.encoded_width, image.encoded_height, qp
                            );
                        }
                        self.last_scale_decision = Some(decision);
                    }

                    self.stats
                        .record_frame(0.0, picture_layers, picture_bytes, picture_key);
                    if self.dropper.on_picture(picture_bytes) {
                        self.receiver.request_drop_next_frame();
                    }
                    picture_bytes = 0;
                    picture_layers = 0;
                    picture_key = false;
                }
                EncoderEvent::Dropped(reason) => {
                    self.stats.record_drop(*reason);
                    self.dropper.on_dropped();
                }
            }
        }
    }

    /// Release the encoder and collect every result still in flight
    pub fn stop(&mut self) -> EncoderResult<Vec<EncoderEvent>> {
        self.encoder.release()?;
        let events = self.poll();
        let violations = self.receiver.order_violations();
        if violations > 0 {
            warn!("{} per-layer ordering violations during session", violations);
        }
        info!("Encoder session stopped: {}", self.stats.summary());
        Ok(events)
    }

    pub fn encoder(&self) -> &dyn VideoEncoder {
        self.encoder.as_ref()
    }

    pub fn encoder_mut(&mut self) -> &mut dyn VideoEncoder {
        self.encoder.as_mut()
    }

    pub fn capabilities(&self) -> &CapabilityTracker {
        &self.capabilities
    }

    pub fn scaler(&self) -> &QualityScaler {
        &self.scaler
    }

    pub fn frame_dropper(&self) -> &FrameDropper {
        &self.dropper
    }

    pub fn last_scale_decision(&self) -> Option<ScaleDecision> {
        self.last_scale_decision
    }

    pub fn receiver(&self) -> &EncodedFrameReceiver {
        &self.receiver
    }

    /// Session-level statistics, built from delivered results
    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }
}
