//! Encoder contract
//!
//! `VideoEncoder` is the single interface the pipeline uses to drive any
//! encoder backend, software or hardware.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     VideoEncoder Trait                        │
//! │  init_encode() | encode() | release() | set_rates()           │
//! │  on_rtt_update() | on_packet_loss_rate_update()               │
//! │  encoder_info()                                               │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼──────────────────────┐
//!        ▼                     ▼                      ▼
//!  ┌────────────┐      ┌──────────────┐      ┌──────────────┐
//!  │  Software  │      │   Hardware   │      │ Passthrough  │
//!  │ (sync)     │      │ (worker thr) │      │ (test stub)  │
//!  └────────────┘      └──────────────┘      └──────────────┘
//!        │                     │                      │
//!        └──── EncodedImageCallback (crate::callback) ┘
//! ```
//!
//! # Threading
//!
//! Encoders are `Send` but used from one thread at a time; every method
//! that changes state takes `&mut self`, which also serializes lifecycle
//! transitions. Results may be delivered from another thread, see
//! [`crate::callback`].
//!
//! # Release
//!
//! `release()` returns only after every frame passed to `encode()` has
//! been delivered or discarded. No callback fires after it returns.

mod error;
mod fallback;
mod info;
mod lifecycle;
mod rates;
pub mod shim;

pub use error::{EncoderError, EncoderResult, HardwareBackendError};
pub use fallback::SoftwareFallbackEncoder;
pub use info::{
    EncoderInfo, FpsAllocation, QpThresholds, ScalingSettings, DEFAULT_MIN_PIXELS_PER_FRAME,
    FULL_FRAMERATE_FRACTION,
};
pub use lifecycle::{EncoderState, InitParams, Lifecycle};
pub use rates::RateControlParameters;
pub use shim::RateProtocol;

use std::sync::Arc;

use tracing::error;

use crate::callback::EncodedImageCallback;
use crate::codec::{VideoBitrateAllocation, VideoCodec, VideoFrame, VideoFrameType};

/// Uniform interface over encoder backends
pub trait VideoEncoder: Send {
    /// Initialize with codec settings
    ///
    /// # Arguments
    ///
    /// * `settings` - Codec settings
    /// * `number_of_cores` - CPU cores available to the encoder
    /// * `max_payload_size` - Maximum size of one payload partition,
    ///   usually MTU minus protocol overhead
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for inconsistent settings or when already
    ///   initialized
    /// - `InsufficientResources` when the backend cannot allocate
    fn init_encode(
        &mut self,
        settings: &VideoCodec,
        number_of_cores: u32,
        max_payload_size: usize,
    ) -> EncoderResult<()>;

    /// Register the receiver of encoded images
    ///
    /// Registered once, before or right after `init_encode()`.
    fn register_encode_complete_callback(
        &mut self,
        callback: Arc<dyn EncodedImageCallback>,
    ) -> EncoderResult<()>;

    /// Free all backend resources
    ///
    /// Blocks until all submitted frames were delivered or discarded.
    /// Calling it when not initialized is a no-op.
    fn release(&mut self) -> EncoderResult<()>;

    /// Submit one frame
    ///
    /// The result is delivered through the registered callback, possibly
    /// before this returns. `frame_types` holds one entry per spatial layer;
    /// `None` lets the encoder choose.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` before `init_encode()` or after `release()`
    /// - `InvalidParameter` for a malformed frame or frame types
    /// - `InsufficientResources` when the backend is out of capacity
    fn encode(
        &mut self,
        frame: &VideoFrame,
        frame_types: Option<&[VideoFrameType]>,
    ) -> EncoderResult<()>;

    /// Which of the rate methods below this backend implements itself
    fn rate_protocol(&self) -> RateProtocol;

    /// Oldest rate call: total bitrate in kbps and integer framerate
    ///
    /// Default fails: no older call exists to fall back to.
    fn set_rates_legacy(&mut self, bitrate_kbps: u32, framerate: u32) -> EncoderResult<()> {
        error!(
            "set_rates_legacy({} kbps, {} fps) reached the default implementation; \
             backend implements none of the rate calls",
            bitrate_kbps, framerate
        );
        Err(EncoderError::NotImplemented("set_rates_legacy"))
    }

    /// Per-layer bitrate with integer framerate
    ///
    /// Default flattens the allocation and calls `set_rates_legacy()`.
    fn set_rate_allocation(
        &mut self,
        allocation: &VideoBitrateAllocation,
        framerate: u32,
    ) -> EncoderResult<()> {
        let (bitrate_kbps, framerate) = shim::allocation_to_legacy(allocation, framerate);
        self.set_rates_legacy(bitrate_kbps, framerate)
    }

    /// Set rate control parameters, valid until the next call
    ///
    /// Default calls `set_rate_allocation()` with the bitrate and rounded
    /// framerate of `parameters`.
    fn set_rates(&mut self, parameters: &RateControlParameters) -> EncoderResult<()> {
        let (allocation, framerate) = shim::structured_to_allocation(parameters);
        self.set_rate_allocation(allocation, framerate)
    }

    /// Packet loss rate changed (0.0 to 1.0). Advisory.
    fn on_packet_loss_rate_update(&mut self, _packet_loss_rate: f32) {}

    /// Round-trip time changed. Advisory.
    fn on_rtt_update(&mut self, _rtt_ms: i64) {}

    /// Current capability snapshot
    ///
    /// May change at runtime, e.g. when a hardware encoder falls back to
    /// software.
    fn encoder_info(&self) -> EncoderInfo {
        EncoderInfo::default()
    }

    /// Lifecycle state
    fn state(&self) -> EncoderState;
}

impl<E: VideoEncoder + ?Sized> VideoEncoder for Box<E> {
    fn init_encode(
        &mut self,
        settings: &VideoCodec,
        number_of_cores: u32,
        max_payload_size: usize,
    ) -> EncoderResult<()> {
        (**self).init_encode(settings, number_of_cores, max_payload_size)
    }

    fn register_encode_complete_callback(
        &mut self,
        callback: Arc<dyn EncodedImageCallback>,
    ) -> EncoderResult<()> {
        (**self).register_encode_complete_callback(callback)
    }

    fn release(&mut self) -> EncoderResult<()> {
        (**self).release()
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        frame_types: Option<&[VideoFrameType]>,
    ) -> EncoderResult<()> {
        (**self).encode(frame, frame_types)
    }

    fn rate_protocol(&self) -> RateProtocol {
        (**self).rate_protocol()
    }

    fn set_rates_legacy(&mut self, bitrate_kbps: u32, framerate: u32) -> EncoderResult<()> {
        (**self).set_rates_legacy(bitrate_kbps, framerate)
    }

    fn set_rate_allocation(
        &mut self,
        allocation: &VideoBitrateAllocation,
        framerate: u32,
    ) -> EncoderResult<()> {
        (**self).set_rate_allocation(allocation, framerate)
    }

    fn set_rates(&mut self, parameters: &RateControlParameters) -> EncoderResult<()> {
        (**self).set_rates(parameters)
    }

    fn on_packet_loss_rate_update(&mut self, packet_loss_rate: f32) {
        (**self).on_packet_loss_rate_update(packet_loss_rate)
    }

    fn on_rtt_update(&mut self, rtt_ms: i64) {
        (**self).on_rtt_update(rtt_ms)
    }

    fn encoder_info(&self) -> EncoderInfo {
        (**self).encoder_info()
    }

    fn state(&self) -> EncoderState {
        (**self).state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DataRate;

    /// Records which rate call reached it
    #[derive(Default)]
    struct RateProbe {
        level: Option<RateProtocol>,
        legacy: Option<(u32, u32)>,
        allocation: Option<(VideoBitrateAllocation, u32)>,
        structured: Option<RateControlParameters>,
    }

    impl VideoEncoder for RateProbe {
        fn init_encode(&mut self, _: &VideoCodec, _: u32, _: usize) -> EncoderResult<()> {
            Ok(())
        }
        fn register_encode_complete_callback(
            &mut self,
            _: Arc<dyn EncodedImageCallback>,
        ) -> EncoderResult<()> {
            Ok(())
        }
        fn release(&mut self) -> EncoderResult<()> {
            Ok(())
        }
        fn encode(&mut self, _: &VideoFrame, _: Option<&[VideoFrameType]>) -> EncoderResult<()> {
            Ok(())
        }
        fn rate_protocol(&self) -> RateProtocol {
            self.level.unwrap_or(RateProtocol::Legacy)
        }
        fn set_rates_legacy(&mut self, bitrate_kbps: u32, framerate: u32) -> EncoderResult<()> {
            match self.level {
                Some(RateProtocol::Legacy) => {
                    self.legacy = Some((bitrate_kbps, framerate));
                    Ok(())
                }
                _ => Err(EncoderError::NotImplemented("set_rates_legacy")),
            }
        }
        fn set_rate_allocation(
            &mut self,
            allocation: &VideoBitrateAllocation,
            framerate: u32,
        ) -> EncoderResult<()> {
            match self.level {
                Some(RateProtocol::Allocation) => {
                    self.allocation = Some((allocation.clone(), framerate));
                    Ok(())
                }
                _ => {
                    let (kbps, fps) = shim::allocation_to_legacy(allocation, framerate);
                    self.set_rates_legacy(kbps, fps)
                }
            }
        }
        fn set_rates(&mut self, parameters: &RateControlParameters) -> EncoderResult<()> {
            match self.level {
                Some(RateProtocol::Structured) => {
                    self.structured = Some(parameters.clone());
                    Ok(())
                }
                _ => {
                    let (allocation, fps) = shim::structured_to_allocation(parameters);
                    self.set_rate_allocation(allocation, fps)
                }
            }
        }
        fn state(&self) -> EncoderState {
            EncoderState::Uninitialized
        }
    }

    /// Overrides nothing rate related
    struct NoRates;

    impl VideoEncoder for NoRates {
        fn init_encode(&mut self, _: &VideoCodec, _: u32, _: usize) -> EncoderResult<()> {
            Ok(())
        }
        fn register_encode_complete_callback(
            &mut self,
            _: Arc<dyn EncodedImageCallback>,
        ) -> EncoderResult<()> {
            Ok(())
        }
        fn release(&mut self) -> EncoderResult<()> {
            Ok(())
        }
        fn encode(&mut self, _: &VideoFrame, _: Option<&[VideoFrameType]>) -> EncoderResult<()> {
            Ok(())
        }
        fn rate_protocol(&self) -> RateProtocol {
            RateProtocol::Legacy
        }
        fn state(&self) -> EncoderState {
            EncoderState::Uninitialized
        }
    }

    /// Overrides only the legacy call, relying on the trait defaults above it
    #[derive(Default)]
    struct LegacyOnly {
        seen: Vec<(u32, u32)>,
    }

    impl VideoEncoder for LegacyOnly {
        fn init_encode(&mut self, _: &VideoCodec, _: u32, _: usize) -> EncoderResult<()> {
            Ok(())
        }
        fn register_encode_complete_callback(
            &mut self,
            _: Arc<dyn EncodedImageCallback>,
        ) -> EncoderResult<()> {
            Ok(())
        }
        fn release(&mut self) -> EncoderResult<()> {
            Ok(())
        }
        fn encode(&mut self, _: &VideoFrame, _: Option<&[VideoFrameType]>) -> EncoderResult<()> {
            Ok(())
        }
        fn rate_protocol(&self) -> RateProtocol {
            RateProtocol::Legacy
        }
        fn set_rates_legacy(&mut self, bitrate_kbps: u32, framerate: u32) -> EncoderResult<()> {
            self.seen.push((bitrate_kbps, framerate));
            Ok(())
        }
        fn state(&self) -> EncoderState {
            EncoderState::Uninitialized
        }
    }

    fn params() -> RateControlParameters {
        let mut allocation = VideoBitrateAllocation::new();
        allocation.set_bitrate(0, 0, 100_000);
        allocation.set_bitrate(1, 0, 0);
        RateControlParameters::new(allocation, 30.0, DataRate::from_kbps(120))
    }

    #[test]
    fn test_default_chain_reaches_legacy() {
        let mut encoder = LegacyOnly::default();
        encoder.set_rates(&params()).unwrap();

        let mut allocation = VideoBitrateAllocation::new();
        allocation.set_bitrate(0, 0, 250_000);
        allocation.set_bitrate(0, 1, 250_000);
        encoder.set_rate_allocation(&allocation, 15).unwrap();

        assert_eq!(encoder.seen, vec![(100, 30), (500, 15)]);
    }

    #[test]
    fn test_default_chain_exhausted_fails_loudly() {
        let mut encoder = NoRates;
        assert_eq!(
            encoder.set_rates(&params()),
            Err(EncoderError::NotImplemented("set_rates_legacy"))
        );
        assert_eq!(
            encoder.set_rates_legacy(100, 30),
            Err(EncoderError::NotImplemented("set_rates_legacy"))
        );
    }

    #[test]
    fn test_each_level_receives_structured_call() {
        let mut structured = RateProbe {
            level: Some(RateProtocol::Structured),
            ..Default::default()
        };
        structured.set_rates(&params()).unwrap();
        assert_eq!(structured.structured, Some(params()));

        let mut allocation = RateProbe {
            level: Some(RateProtocol::Allocation),
            ..Default::default()
        };
        allocation.set_rates(&params()).unwrap();
        assert_eq!(allocation.allocation, Some((params().bitrate, 30)));

        let mut legacy = RateProbe {
            level: Some(RateProtocol::Legacy),
            ..Default::default()
        };
        legacy.set_rates(&params()).unwrap();
        assert_eq!(legacy.legacy, Some((100, 30)));
    }

    #[test]
    fn test_boxed_encoder_forwards() {
        let mut boxed: Box<dyn VideoEncoder> = Box::new(LegacyOnly::default());
        boxed.set_rates(&params()).unwrap();
        assert_eq!(boxed.rate_protocol(), RateProtocol::Legacy);
        assert_eq!(boxed.encoder_info(), EncoderInfo::default());
    }
}
