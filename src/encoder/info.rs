//! Capability snapshot reported by an encoder
//!
//! `EncoderInfo` is returned by value from `VideoEncoder::encoder_info()`.
//! It may differ between two calls on the same instance, e.g. after a
//! hardware backend fell back to software, so callers re-fetch it on
//! every control iteration instead of caching it.

use serde::{Deserialize, Serialize};

use crate::codec::{MAX_SPATIAL_LAYERS, MAX_TEMPORAL_STREAMS};

use super::{EncoderError, EncoderResult};

/// QP bounds driving the quality scaler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QpThresholds {
    /// Below this, quality is good enough to upscale
    pub low: i32,
    /// Above this, quality is poor and resolution should drop
    pub high: i32,
}

impl QpThresholds {
    pub fn new(low: i32, high: i32) -> Self {
        Self { low, high }
    }
}

/// Quality scaling configuration. Scaling is enabled when thresholds are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingSettings {
    pub thresholds: Option<QpThresholds>,
    /// The scaler never asks for a resolution below this pixel count
    pub min_pixels_per_frame: u32,
}

/// Default floor for quality-driven downscaling
pub const DEFAULT_MIN_PIXELS_PER_FRAME: u32 = 320 * 180;

impl ScalingSettings {
    /// Scaling disabled
    pub const OFF: ScalingSettings = ScalingSettings {
        thresholds: None,
        min_pixels_per_frame: DEFAULT_MIN_PIXELS_PER_FRAME,
    };

    pub fn new(low: i32, high: i32) -> Self {
        Self::with_min_pixels(low, high, DEFAULT_MIN_PIXELS_PER_FRAME)
    }

    pub fn with_min_pixels(low: i32, high: i32, min_pixels_per_frame: u32) -> Self {
        Self {
            thresholds: Some(QpThresholds::new(low, high)),
            min_pixels_per_frame,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.thresholds.is_some()
    }
}

impl Default for ScalingSettings {
    fn default() -> Self {
        Self::OFF
    }
}

/// 100% of the input frame rate
pub const FULL_FRAMERATE_FRACTION: u8 = u8::MAX;

/// Frame-rate fraction per spatial/temporal layer
///
/// For each spatial layer, entry `t` is the fraction (0 = 0%, 255 = 100%)
/// of input frames decodable with temporal layers `0..=t`. Fractions are
/// cumulative: a higher temporal layer includes every layer below it, so
/// within one spatial layer the sequence never decreases. An empty
/// sequence means the frame rate of that layer is undefined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsAllocation {
    layers: [Vec<u8>; MAX_SPATIAL_LAYERS],
}

impl Default for FpsAllocation {
    fn default() -> Self {
        let mut layers: [Vec<u8>; MAX_SPATIAL_LAYERS] = Default::default();
        layers[0] = vec![FULL_FRAMERATE_FRACTION];
        Self { layers }
    }
}

impl FpsAllocation {
    /// All layers undefined
    pub fn empty() -> Self {
        Self {
            layers: Default::default(),
        }
    }

    /// Table for spatial layers with the given temporal layer counts,
    /// each temporal layer doubling the frame rate of the one below
    pub fn from_temporal_layer_counts(counts: &[u8]) -> EncoderResult<Self> {
        if counts.len() > MAX_SPATIAL_LAYERS {
            return Err(EncoderError::InvalidParameter(format!(
                "{} spatial layers exceed maximum of {}",
                counts.len(),
                MAX_SPATIAL_LAYERS
            )));
        }

        let mut table = Self::empty();
        for (spatial, &count) in counts.iter().enumerate() {
            let count = count as usize;
            if count > MAX_TEMPORAL_STREAMS {
                return Err(EncoderError::InvalidParameter(format!(
                    "{} temporal layers exceed maximum of {}",
                    count, MAX_TEMPORAL_STREAMS
                )));
            }
            let fractions: Vec<u8> = (0..count)
                .map(|t| FULL_FRAMERATE_FRACTION >> (count - 1 - t))
                .collect();
            table.set_layer(spatial, fractions)?;
        }
        Ok(table)
    }

    /// Replace the fractions of one spatial layer
    ///
    /// Rejects sequences longer than the temporal layer maximum and
    /// sequences that decrease.
    pub fn set_layer(&mut self, spatial_index: usize, fractions: Vec<u8>) -> EncoderResult<()> {
        if spatial_index >= MAX_SPATIAL_LAYERS {
            return Err(EncoderError::InvalidParameter(format!(
                "spatial index {} out of range",
                spatial_index
            )));
        }
        if fractions.len() > MAX_TEMPORAL_STREAMS {
            return Err(EncoderError::InvalidParameter(format!(
                "{} temporal layers exceed maximum of {}",
                fractions.len(),
                MAX_TEMPORAL_STREAMS
            )));
        }
        if !is_cumulative(&fractions) {
            return Err(EncoderError::InvalidParameter(format!(
                "frame rate fractions {:?} for spatial layer {} are not cumulative",
                fractions, spatial_index
            )));
        }

        self.layers[spatial_index] = fractions;
        Ok(())
    }

    /// Fractions of one spatial layer (empty when undefined)
    pub fn layer(&self, spatial_index: usize) -> &[u8] {
        self.layers
            .get(spatial_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Frame rate of temporal layers `0..=temporal_index` given the input
    /// frame rate, or `None` when undefined
    pub fn framerate(
        &self,
        spatial_index: usize,
        temporal_index: usize,
        input_fps: f64,
    ) -> Option<f64> {
        self.layer(spatial_index)
            .get(temporal_index)
            .map(|&fraction| input_fps * fraction as f64 / FULL_FRAMERATE_FRACTION as f64)
    }

    /// Whether every spatial layer satisfies the cumulative invariant
    pub fn is_cumulative(&self) -> bool {
        self.layers.iter().all(|layer| is_cumulative(layer))
    }
}

fn is_cumulative(fractions: &[u8]) -> bool {
    fractions.windows(2).all(|w| w[0] <= w[1])
}

/// Metadata describing an encoder implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderInfo {
    /// Thresholds for the pipeline's quality scaler; `OFF` disables it
    pub scaling_settings: ScalingSettings,

    /// Accepts native handles (GPU textures) instead of raw buffers
    pub supports_native_handle: bool,

    /// Human-readable implementation name, e.g. "software-reference"
    pub implementation_name: String,

    /// The encoder hits the target bitrate on its own, dropping frames if
    /// needed. When set, the pipeline disables its own frame dropper.
    pub has_trusted_rate_controller: bool,

    /// Hardware-backed; the pipeline uses different CPU adaptation
    /// thresholds
    pub is_hardware_accelerated: bool,

    /// Frames come from an internal source rather than `encode()`
    pub has_internal_source: bool,

    pub fps_allocation: FpsAllocation,
}

impl Default for EncoderInfo {
    fn default() -> Self {
        Self {
            scaling_settings: ScalingSettings::OFF,
            supports_native_handle: false,
            implementation_name: "unknown".to_string(),
            has_trusted_rate_controller: false,
            is_hardware_accelerated: false,
            has_internal_source: false,
            fps_allocation: FpsAllocation::default(),
        }
    }
}
