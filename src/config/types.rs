//! Configuration sections

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Encoder selection and codec settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Backend: "auto", "software", "hardware", "passthrough"
    pub backend: String,

    /// Fall back to the software backend when hardware runs out of resources
    pub fallback_to_software: bool,

    /// Codec: "vp8", "vp9", "h264", "generic"
    pub codec: String,

    pub width: u32,
    pub height: u32,

    /// Spatial layers, each halving the resolution of the next
    #[serde(default = "default_spatial_layers")]
    pub spatial_layers: usize,

    #[serde(default = "default_temporal_layers")]
    pub temporal_layers: u8,

    pub start_bitrate_kbps: u32,
    pub min_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub max_framerate: u32,

    /// CPU cores handed to the encoder (0 = detect)
    #[serde(default)]
    pub number_of_cores: u32,

    /// Largest payload partition, usually MTU minus protocol overhead
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,

    /// Tune for screen content instead of camera video
    #[serde(default)]
    pub screensharing: bool,
}

fn default_spatial_layers() -> usize {
    1
}

fn default_temporal_layers() -> u8 {
    1
}

fn default_max_payload_size() -> usize {
    1200
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            backend: "auto".to_string(),
            fallback_to_software: true,
            codec: "vp8".to_string(),
            width: 640,
            height: 360,
            spatial_layers: default_spatial_layers(),
            temporal_layers: default_temporal_layers(),
            start_bitrate_kbps: 300,
            min_bitrate_kbps: 30,
            max_bitrate_kbps: 2500,
            max_framerate: 30,
            number_of_cores: 0,
            max_payload_size: default_max_payload_size(),
            screensharing: false,
        }
    }
}

/// Hardware backend tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Concurrent encode sessions the device supports
    pub max_sessions: usize,

    /// Frames that may wait for the encoder worker
    pub queue_depth: usize,

    /// How long `encode()` waits for a queue slot (ms)
    pub submit_timeout_ms: u64,

    /// Largest frame the device encodes (pixels)
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,

    /// QP thresholds advertised to the quality scaler
    pub qp_low: i32,
    pub qp_high: i32,

    /// Shortest intra-refresh period under heavy loss (frames)
    #[serde(default = "default_min_intra_refresh_frames")]
    pub min_intra_refresh_frames: u32,

    /// Buffered data the rate controller tolerates before skipping (ms)
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,
}

fn default_max_pixels() -> u64 {
    4096 * 2304
}

fn default_min_intra_refresh_frames() -> u32 {
    30
}

fn default_rate_window_ms() -> u64 {
    500
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            max_sessions: 2,
            queue_depth: 8,
            submit_timeout_ms: 100,
            max_pixels: default_max_pixels(),
            qp_low: 24,
            qp_high: 37,
            min_intra_refresh_frames: default_min_intra_refresh_frames(),
            rate_window_ms: default_rate_window_ms(),
        }
    }
}

/// Quality scaling advertised by the software backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Disable to advertise no thresholds
    pub enabled: bool,

    pub qp_low: i32,
    pub qp_high: i32,

    /// Never scale below this many pixels
    #[serde(default = "default_min_pixels_per_frame")]
    pub min_pixels_per_frame: u32,
}

fn default_min_pixels_per_frame() -> u32 {
    320 * 180
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            qp_low: 24,
            qp_high: 37,
            min_pixels_per_frame: default_min_pixels_per_frame(),
        }
    }
}

/// Pipeline-side adaptation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Media-optimization frame dropper (ignored for encoders with a
    /// trusted rate controller)
    pub frame_dropper_enabled: bool,

    /// Undrained results tolerated before the callback reports SendFailed
    pub channel_capacity: usize,

    /// Data the frame dropper tolerates above target before dropping (ms)
    #[serde(default = "default_drop_window_ms")]
    pub drop_window_ms: u64,
}

fn default_drop_window_ms() -> u64 {
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_dropper_enabled: true,
            channel_capacity: 64,
            drop_window_ms: default_drop_window_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Output format ("pretty", "compact", "json")
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file (None = console only)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: default_log_format(),
            log_file: None,
        }
    }
}
