//! Configuration management
//!
//! Handles loading and validation of configuration from:
//! - TOML files
//! - CLI arguments (see `main.rs`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod types;

pub use types::{EncoderConfig, HardwareConfig, LoggingConfig, PipelineConfig, ScalingConfig};

use crate::backends::{BackendKind, HardwareEncoderConfig};
use crate::codec::{CodecType, ContentMode, VideoCodec};
use crate::encoder::ScalingSettings;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Encoder selection and codec settings
    pub encoder: EncoderConfig,
    /// Hardware backend configuration
    #[serde(default)]
    pub hardware: HardwareConfig,
    /// Software quality scaling thresholds
    #[serde(default)]
    pub scaling: ScalingConfig,
    /// Pipeline adaptation
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if BackendKind::from_str(&self.encoder.backend).is_none() {
            anyhow::bail!("Invalid encoder backend: {}", self.encoder.backend);
        }

        if CodecType::from_str(&self.encoder.codec).is_none() {
            anyhow::bail!("Invalid codec: {}", self.encoder.codec);
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            _ => anyhow::bail!("Invalid log format: {}", self.logging.format),
        }

        if self.encoder.max_payload_size == 0 {
            anyhow::bail!("max_payload_size must be non-zero");
        }

        if self.hardware.max_sessions == 0 || self.hardware.queue_depth == 0 {
            anyhow::bail!(
                "Hardware max_sessions ({}) and queue_depth ({}) must be non-zero",
                self.hardware.max_sessions,
                self.hardware.queue_depth
            );
        }

        if self.pipeline.channel_capacity == 0 {
            anyhow::bail!("Pipeline channel_capacity must be non-zero");
        }

        // Validate QP ranges
        if self.scaling.qp_low > self.scaling.qp_high {
            anyhow::bail!(
                "scaling qp_low ({}) cannot be greater than qp_high ({})",
                self.scaling.qp_low,
                self.scaling.qp_high
            );
        }
        if self.hardware.qp_low > self.hardware.qp_high {
            anyhow::bail!(
                "hardware qp_low ({}) cannot be greater than qp_high ({})",
                self.hardware.qp_low,
                self.hardware.qp_high
            );
        }

        // Codec-level consistency is checked by the same rules init_encode applies
        self.to_codec_settings()?
            .validate()
            .context("Invalid encoder settings")?;

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, backend: Option<String>, codec: Option<String>) -> Self {
        if let Some(backend) = backend {
            self.encoder.backend = backend;
        }
        if let Some(codec) = codec {
            self.encoder.codec = codec;
        }
        self
    }

    /// Codec settings for `VideoEncoder::init_encode`
    pub fn to_codec_settings(&self) -> Result<VideoCodec> {
        let codec_type = CodecType::from_str(&self.encoder.codec)
            .with_context(|| format!("Invalid codec: {}", self.encoder.codec))?;

        let mut codec = VideoCodec::new(codec_type, self.encoder.width, self.encoder.height);
        codec.start_bitrate_kbps = self.encoder.start_bitrate_kbps;
        codec.min_bitrate_kbps = self.encoder.min_bitrate_kbps;
        codec.max_bitrate_kbps = self.encoder.max_bitrate_kbps;
        codec.max_framerate = self.encoder.max_framerate;
        if self.encoder.screensharing {
            codec.mode = ContentMode::Screensharing;
        }

        match codec_type {
            CodecType::Vp8 => codec.vp8.number_of_temporal_layers = self.encoder.temporal_layers,
            CodecType::Vp9 => {
                codec.vp9.number_of_temporal_layers = self.encoder.temporal_layers;
                codec.vp9.number_of_spatial_layers =
                    self.encoder.spatial_layers.min(u8::MAX as usize) as u8;
            }
            CodecType::H264 | CodecType::Generic => {}
        }

        if self.encoder.spatial_layers > 1 || self.encoder.temporal_layers > 1 {
            codec = codec.with_spatial_layers(
                self.encoder.spatial_layers.max(1),
                self.encoder.temporal_layers,
            );
        }
        Ok(codec)
    }

    /// CPU cores for `init_encode`, detecting when configured as 0
    pub fn number_of_cores(&self) -> u32 {
        if self.encoder.number_of_cores > 0 {
            return self.encoder.number_of_cores;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    }

    /// Tunables for the hardware backend
    pub fn hardware_encoder_config(&self) -> HardwareEncoderConfig {
        HardwareEncoderConfig {
            queue_depth: self.hardware.queue_depth,
            submit_timeout: Duration::from_millis(self.hardware.submit_timeout_ms),
            max_pixels: self.hardware.max_pixels,
            scaling: ScalingSettings::with_min_pixels(
                self.hardware.qp_low,
                self.hardware.qp_high,
                self.scaling.min_pixels_per_frame,
            ),
            min_intra_refresh_frames: self.hardware.min_intra_refresh_frames,
            rate_window: Duration::from_millis(self.hardware.rate_window_ms),
        }
    }

    /// Scaling settings advertised by the software backend
    pub fn software_scaling(&self) -> ScalingSettings {
        if !self.scaling.enabled {
            return ScalingSettings::OFF;
        }
        ScalingSettings::with_min_pixels(
            self.scaling.qp_low,
            self.scaling.qp_high,
            self.scaling.min_pixels_per_frame,
        )
    }
}
