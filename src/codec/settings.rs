//! Codec settings passed to `VideoEncoder::init_encode`

use serde::{Deserialize, Serialize};

use super::{MAX_SPATIAL_LAYERS, MAX_TEMPORAL_STREAMS};
use crate::encoder::{EncoderError, EncoderResult};

/// Codec family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    Vp8,
    Vp9,
    H264,
    Generic,
}

impl CodecType {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "vp8" => Some(Self::Vp8),
            "vp9" => Some(Self::Vp9),
            "h264" | "avc" => Some(Self::H264),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }
}

impl std::fmt::Display for CodecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vp8 => write!(f, "VP8"),
            Self::Vp9 => write!(f, "VP9"),
            Self::H264 => write!(f, "H264"),
            Self::Generic => write!(f, "Generic"),
        }
    }
}

/// Content the encoder is tuned for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    #[default]
    RealtimeVideo,
    Screensharing,
}

/// Inter-layer prediction mode for VP9 SVC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterLayerPrediction {
    Off,
    #[default]
    On,
    /// Only on key pictures
    OnKeyPic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vp8Settings {
    pub number_of_temporal_layers: u8,
    pub denoising_on: bool,
    pub automatic_resize_on: bool,
    pub frame_dropping_on: bool,
    pub key_frame_interval: u32,
}

impl Default for Vp8Settings {
    fn default() -> Self {
        Self {
            number_of_temporal_layers: 1,
            denoising_on: true,
            automatic_resize_on: true,
            frame_dropping_on: true,
            key_frame_interval: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vp9Settings {
    pub number_of_temporal_layers: u8,
    pub number_of_spatial_layers: u8,
    pub denoising_on: bool,
    pub frame_dropping_on: bool,
    pub key_frame_interval: u32,
    pub adaptive_qp_on: bool,
    pub automatic_resize_on: bool,
    pub flexible_mode: bool,
    pub inter_layer_pred: InterLayerPrediction,
}

impl Default for Vp9Settings {
    fn default() -> Self {
        Self {
            number_of_temporal_layers: 1,
            number_of_spatial_layers: 1,
            denoising_on: true,
            frame_dropping_on: true,
            key_frame_interval: 3000,
            adaptive_qp_on: true,
            automatic_resize_on: true,
            flexible_mode: false,
            inter_layer_pred: InterLayerPrediction::On,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct H264Settings {
    pub frame_dropping_on: bool,
    pub key_frame_interval: u32,
}

impl Default for H264Settings {
    fn default() -> Self {
        Self {
            frame_dropping_on: true,
            key_frame_interval: 3000,
        }
    }
}

/// One spatial layer (SVC layer or simulcast stream)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialLayer {
    pub width: u32,
    pub height: u32,
    pub max_framerate: f32,
    pub num_temporal_layers: u8,
    pub min_bitrate_kbps: u32,
    pub target_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub active: bool,
}

impl SpatialLayer {
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Codec configuration for one encoder instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoCodec {
    pub codec_type: CodecType,
    pub width: u32,
    pub height: u32,
    pub start_bitrate_kbps: u32,
    pub min_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub max_framerate: u32,
    pub qp_max: u32,
    pub mode: ContentMode,
    /// Prefer native handles (textures) over raw buffers when the backend
    /// supports them
    pub expect_encode_from_texture: bool,
    /// Spatial layers, lowest resolution first; empty means one layer at
    /// the top resolution
    pub spatial_layers: Vec<SpatialLayer>,
    pub vp8: Vp8Settings,
    pub vp9: Vp9Settings,
    pub h264: H264Settings,
}

impl VideoCodec {
    /// Single-layer settings at the given resolution
    pub fn new(codec_type: CodecType, width: u32, height: u32) -> Self {
        Self {
            codec_type,
            width,
            height,
            start_bitrate_kbps: 300,
            min_bitrate_kbps: 30,
            max_bitrate_kbps: 2500,
            max_framerate: 30,
            qp_max: 56,
            mode: ContentMode::RealtimeVideo,
            expect_encode_from_texture: false,
            spatial_layers: Vec::new(),
            vp8: Vp8Settings::default(),
            vp9: Vp9Settings::default(),
            h264: H264Settings::default(),
        }
    }

    /// Split into `count` spatial layers, each halving the resolution of
    /// the one above it, with `temporal_layers` temporal layers each
    pub fn with_spatial_layers(mut self, count: usize, temporal_layers: u8) -> Self {
        self.spatial_layers = (0..count)
            .map(|i| {
                let shift = (count - 1 - i) as u32;
                let width = (self.width >> shift).max(2) & !1;
                let height = (self.height >> shift).max(2) & !1;
                let share = self.max_bitrate_kbps >> shift;
                SpatialLayer {
                    width,
                    height,
                    max_framerate: self.max_framerate as f32,
                    num_temporal_layers: temporal_layers,
                    min_bitrate_kbps: self.min_bitrate_kbps.min(share),
                    target_bitrate_kbps: share * 3 / 4,
                    max_bitrate_kbps: share,
                    active: true,
                }
            })
            .collect();
        self
    }

    /// Effective spatial layers (a single implicit layer when none are set)
    pub fn layers(&self) -> Vec<SpatialLayer> {
        if self.spatial_layers.is_empty() {
            vec![SpatialLayer {
                width: self.width,
                height: self.height,
                max_framerate: self.max_framerate as f32,
                num_temporal_layers: self.temporal_layers_hint(),
                min_bitrate_kbps: self.min_bitrate_kbps,
                target_bitrate_kbps: self.start_bitrate_kbps,
                max_bitrate_kbps: self.max_bitrate_kbps,
                active: true,
            }]
        } else {
            self.spatial_layers.clone()
        }
    }

    fn temporal_layers_hint(&self) -> u8 {
        match self.codec_type {
            CodecType::Vp8 => self.vp8.number_of_temporal_layers,
            CodecType::Vp9 => self.vp9.number_of_temporal_layers,
            CodecType::H264 | CodecType::Generic => 1,
        }
    }

    /// Key frame interval in frames, 0 meaning "only on request"
    pub fn key_frame_interval(&self) -> u32 {
        match self.codec_type {
            CodecType::Vp8 => self.vp8.key_frame_interval,
            CodecType::Vp9 => self.vp9.key_frame_interval,
            CodecType::H264 => self.h264.key_frame_interval,
            CodecType::Generic => 0,
        }
    }

    pub fn frame_dropping_on(&self) -> bool {
        match self.codec_type {
            CodecType::Vp8 => self.vp8.frame_dropping_on,
            CodecType::Vp9 => self.vp9.frame_dropping_on,
            CodecType::H264 => self.h264.frame_dropping_on,
            CodecType::Generic => false,
        }
    }

    /// Check settings for internal consistency
    pub fn validate(&self) -> EncoderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EncoderError::InvalidParameter(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        if self.max_framerate == 0 {
            return Err(EncoderError::InvalidParameter(
                "max framerate must be non-zero".to_string(),
            ));
        }
        if self.min_bitrate_kbps > self.max_bitrate_kbps
            || (self.start_bitrate_kbps != 0
                && (self.start_bitrate_kbps < self.min_bitrate_kbps
                    || self.start_bitrate_kbps > self.max_bitrate_kbps))
        {
            return Err(EncoderError::InvalidParameter(format!(
                "inconsistent bitrates: min={} start={} max={} kbps",
                self.min_bitrate_kbps, self.start_bitrate_kbps, self.max_bitrate_kbps
            )));
        }
        if self.spatial_layers.len() > MAX_SPATIAL_LAYERS {
            return Err(EncoderError::InvalidParameter(format!(
                "{} spatial layers requested, at most {} supported",
                self.spatial_layers.len(),
                MAX_SPATIAL_LAYERS
            )));
        }

        for (i, layer) in self.layers().iter().enumerate() {
            if layer.width == 0 || layer.height == 0 {
                return Err(EncoderError::InvalidParameter(format!(
                    "spatial layer {} has empty resolution",
                    i
                )));
            }
            if layer.width > self.width || layer.height > self.height {
                return Err(EncoderError::InvalidParameter(format!(
                    "spatial layer {} ({}x{}) exceeds codec resolution {}x{}",
                    i, layer.width, layer.height, self.width, self.height
                )));
            }
            if layer.num_temporal_layers == 0
                || layer.num_temporal_layers as usize > MAX_TEMPORAL_STREAMS
            {
                return Err(EncoderError::InvalidParameter(format!(
                    "spatial layer {} has {} temporal layers (1..={} supported)",
                    i, layer.num_temporal_layers, MAX_TEMPORAL_STREAMS
                )));
            }
        }

        Ok(())
    }
}
