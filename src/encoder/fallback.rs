//! Runtime fallback from a primary (hardware) backend to a software one
//!
//! The wrapper behaves like one encoder towards the pipeline. When the
//! primary backend reports `InsufficientResources`, either from
//! `init_encode()` or from `encode()`, it is released and the fallback
//! backend takes over with the same settings, rates and callback. The
//! switch is visible only through `encoder_info()`, which from then on
//! describes the fallback backend.
//!
//! Every `init_encode()` tries the primary again, so a release/init cycle
//! with a healthy primary reproduces the original capabilities.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{
    EncoderError, EncoderInfo, EncoderResult, EncoderState, InitParams, RateControlParameters,
    RateProtocol, VideoEncoder,
};
use crate::callback::EncodedImageCallback;
use crate::codec::{VideoBitrateAllocation, VideoCodec, VideoFrame, VideoFrameType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    Primary,
    Fallback,
}

/// Encoder that switches to a fallback backend on resource failures
pub struct SoftwareFallbackEncoder {
    primary: Box<dyn VideoEncoder>,
    fallback: Box<dyn VideoEncoder>,
    active: Active,
    callback: Option<Arc<dyn EncodedImageCallback>>,
    init: Option<InitParams>,
    rates: Option<RateControlParameters>,
    packet_loss_rate: Option<f32>,
    rtt_ms: Option<i64>,
    fallback_count: u32,
}

impl SoftwareFallbackEncoder {
    pub fn new(primary: Box<dyn VideoEncoder>, fallback: Box<dyn VideoEncoder>) -> Self {
        Self {
            primary,
            fallback,
            active: Active::Primary,
            callback: None,
            init: None,
            rates: None,
            packet_loss_rate: None,
            rtt_ms: None,
            fallback_count: 0,
        }
    }

    /// Whether the fallback backend is currently encoding
    pub fn is_fallback_active(&self) -> bool {
        self.active == Active::Fallback
    }

    /// How many times this wrapper switched to the fallback backend
    pub fn fallback_count(&self) -> u32 {
        self.fallback_count
    }

    fn active_mut(&mut self) -> &mut dyn VideoEncoder {
        match self.active {
            Active::Primary => self.primary.as_mut(),
            Active::Fallback => self.fallback.as_mut(),
        }
    }

    fn active_ref(&self) -> &dyn VideoEncoder {
        match self.active {
            Active::Primary => self.primary.as_ref(),
            Active::Fallback => self.fallback.as_ref(),
        }
    }

    /// Bring up the fallback backend with the stored settings and state
    fn switch_to_fallback(&mut self, cause: &EncoderError) -> EncoderResult<()> {
        let params = self.init.clone().ok_or(EncoderError::NotInitialized)?;

        warn!(
            "Primary encoder '{}' failed ({}), falling back to '{}'",
            self.primary.encoder_info().implementation_name,
            cause,
            self.fallback.encoder_info().implementation_name
        );

        if let Err(e) = self.primary.release() {
            debug!("Releasing failed primary encoder: {}", e);
        }

        if let Some(callback) = &self.callback {
            self.fallback
                .register_encode_complete_callback(Arc::clone(callback))?;
        }
        self.fallback.init_encode(
            &params.settings,
            params.number_of_cores,
            params.max_payload_size,
        )?;

        self.active = Active::Fallback;
        self.fallback_count += 1;

        if let Some(rates) = self.rates.clone() {
            self.fallback.set_rates(&rates)?;
        }
        if let Some(rate) = self.packet_loss_rate {
            self.fallback.on_packet_loss_rate_update(rate);
        }
        if let Some(rtt) = self.rtt_ms {
            self.fallback.on_rtt_update(rtt);
        }

        info!(
            "Fallback encoder '{}' active",
            self.fallback.encoder_info().implementation_name
        );
        Ok(())
    }
}

impl VideoEncoder for SoftwareFallbackEncoder {
    fn init_encode(
        &mut self,
        settings: &VideoCodec,
        number_of_cores: u32,
        max_payload_size: usize,
    ) -> EncoderResult<()> {
        if self.active_ref().state() == EncoderState::Initialized {
            return Err(EncoderError::InvalidParameter(
                "encoder already initialized, release() first".to_string(),
            ));
        }

        self.init = Some(InitParams {
            settings: settings.clone(),
            number_of_cores,
            max_payload_size,
        });
        self.rates = None;
        self.active = Active::Primary;

        if let Some(callback) = &self.callback {
            self.primary
                .register_encode_complete_callback(Arc::clone(callback))?;
        }

        match self
            .primary
            .init_encode(settings, number_of_cores, max_payload_size)
        {
            Ok(()) => Ok(()),
            Err(e) if e.should_fallback() => self.switch_to_fallback(&e),
            Err(e) => {
                self.init = None;
                Err(e)
            }
        }
    }

    fn register_encode_complete_callback(
        &mut self,
        callback: Arc<dyn EncodedImageCallback>,
    ) -> EncoderResult<()> {
        self.callback = Some(Arc::clone(&callback));
        self.active_mut().register_encode_complete_callback(callback)
    }

    fn release(&mut self) -> EncoderResult<()> {
        let result = self.active_mut().release();
        self.init = None;
        result
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        frame_types: Option<&[VideoFrameType]>,
    ) -> EncoderResult<()> {
        match self.active_mut().encode(frame, frame_types) {
            Err(e) if e.should_fallback() && self.active == Active::Primary => {
                self.switch_to_fallback(&e)?;
                self.fallback.encode(frame, frame_types)
            }
            result => result,
        }
    }

    fn rate_protocol(&self) -> RateProtocol {
        self.active_ref().rate_protocol()
    }

    fn set_rates_legacy(&mut self, bitrate_kbps: u32, framerate: u32) -> EncoderResult<()> {
        self.active_mut().set_rates_legacy(bitrate_kbps, framerate)?;
        let allocation = VideoBitrateAllocation::single_layer(bitrate_kbps.saturating_mul(1000));
        self.rates = Some(RateControlParameters::from_allocation(allocation, framerate as f64));
        Ok(())
    }

    fn set_rate_allocation(
        &mut self,
        allocation: &VideoBitrateAllocation,
        framerate: u32,
    ) -> EncoderResult<()> {
        self.active_mut().set_rate_allocation(allocation, framerate)?;
        self.rates = Some(RateControlParameters::from_allocation(
            allocation.clone(),
            framerate as f64,
        ));
        Ok(())
    }

    fn set_rates(&mut self, parameters: &RateControlParameters) -> EncoderResult<()> {
        self.active_mut().set_rates(parameters)?;
        self.rates = Some(parameters.clone());
        Ok(())
    }

    fn on_packet_loss_rate_update(&mut self, packet_loss_rate: f32) {
        self.packet_loss_rate = Some(packet_loss_rate);
        self.active_mut().on_packet_loss_rate_update(packet_loss_rate);
    }

    fn on_rtt_update(&mut self, rtt_ms: i64) {
        self.rtt_ms = Some(rtt_ms);
        self.active_mut().on_rtt_update(rtt_ms);
    }

    fn encoder_info(&self) -> EncoderInfo {
        match self.active {
            Active::Primary => self.primary.encoder_info(),
            Active::Fallback => {
                let mut info = self.fallback.encoder_info();
                info.implementation_name = format!(
                    "{} (fallback from {})",
                    info.implementation_name,
                    self.primary.encoder_info().implementation_name
                );
                info
            }
        }
    }

    fn state(&self) -> EncoderState {
        self.active_ref().state()
    }
}
