//! Unified statistics for encoder backends
//!
//! Every backend populates the same structure, so the probe binary and
//! logs report software, hardware and passthrough encoders the same way.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::callback::DropReason;

/// Counters and timing for one encoder instance
#[derive(Debug, Clone, Serialize)]
pub struct EncoderStats {
    /// Backend identifier ("software", "hardware", ...)
    pub backend: &'static str,

    /// Input frames that produced at least one layer
    pub frames_encoded: u64,

    /// Encoded layers delivered to the callback
    pub layers_encoded: u64,

    /// Total bytes of encoded output
    pub bytes_encoded: u64,

    /// Exponential moving average of per-frame encode time (ms)
    pub avg_encode_time_ms: f32,

    pub min_encode_time_ms: f32,

    pub max_encode_time_ms: f32,

    /// Output bitrate since creation (kbps)
    pub bitrate_kbps: u32,

    /// Last bitrate pushed through `set_rates` (kbps)
    pub target_bitrate_kbps: u32,

    pub keyframes_encoded: u64,

    /// Frames skipped on request of the callback
    pub dropped_by_media_optimizations: u64,

    /// Frames skipped by the encoder's own rate controller
    pub dropped_by_encoder: u64,

    /// Callback results reporting `SendFailed`
    pub send_failures: u64,

    #[serde(skip)]
    pub uptime: Duration,

    #[serde(skip)]
    created_at: Instant,
}

impl EncoderStats {
    pub fn new(backend: &'static str, target_bitrate_kbps: u32) -> Self {
        Self {
            backend,
            frames_encoded: 0,
            layers_encoded: 0,
            bytes_encoded: 0,
            avg_encode_time_ms: 0.0,
            min_encode_time_ms: f32::MAX,
            max_encode_time_ms: 0.0,
            bitrate_kbps: 0,
            target_bitrate_kbps,
            keyframes_encoded: 0,
            dropped_by_media_optimizations: 0,
            dropped_by_encoder: 0,
            send_failures: 0,
            uptime: Duration::ZERO,
            created_at: Instant::now(),
        }
    }

    /// Update after one input frame was encoded into `layers` layers
    pub fn record_frame(
        &mut self,
        encode_time_ms: f32,
        layers: usize,
        bytes: usize,
        is_keyframe: bool,
    ) {
        self.frames_encoded += 1;
        self.layers_encoded += layers as u64;
        self.bytes_encoded += bytes as u64;

        if self.frames_encoded == 1 {
            self.avg_encode_time_ms = encode_time_ms;
        } else {
            // Exponential moving average (α = 0.1)
            self.avg_encode_time_ms = self.avg_encode_time_ms * 0.9 + encode_time_ms * 0.1;
        }

        self.min_encode_time_ms = self.min_encode_time_ms.min(encode_time_ms);
        self.max_encode_time_ms = self.max_encode_time_ms.max(encode_time_ms);

        if is_keyframe {
            self.keyframes_encoded += 1;
        }

        self.uptime = self.created_at.elapsed();
        self.update_bitrate_estimate();
    }

    pub fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::DroppedByMediaOptimizations => self.dropped_by_media_optimizations += 1,
            DropReason::DroppedByEncoder => self.dropped_by_encoder += 1,
        }
        self.uptime = self.created_at.elapsed();
    }

    pub fn record_send_failure(&mut self) {
        self.send_failures += 1;
    }

    pub fn set_target_bitrate_kbps(&mut self, kbps: u32) {
        self.target_bitrate_kbps = kbps;
    }

    fn update_bitrate_estimate(&mut self) {
        let elapsed_secs = self.uptime.as_secs_f32();
        if elapsed_secs > 0.5 {
            self.bitrate_kbps = ((self.bytes_encoded * 8) as f32 / elapsed_secs / 1000.0) as u32;
        }
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped_by_media_optimizations + self.dropped_by_encoder
    }

    pub fn fps(&self) -> f32 {
        let elapsed_secs = self.uptime.as_secs_f32();
        if elapsed_secs > 0.0 {
            self.frames_encoded as f32 / elapsed_secs
        } else {
            0.0
        }
    }

    pub fn keyframe_percentage(&self) -> f32 {
        if self.frames_encoded > 0 {
            (self.keyframes_encoded as f32 / self.frames_encoded as f32) * 100.0
        } else {
            0.0
        }
    }

    pub fn drop_percentage(&self) -> f32 {
        let total = self.frames_encoded + self.frames_dropped();
        if total > 0 {
            (self.frames_dropped() as f32 / total as f32) * 100.0
        } else {
            0.0
        }
    }

    /// Format stats for logging
    pub fn summary(&self) -> String {
        format!(
            "{}: {} frames ({} layers), {} dropped, {} kbps (target {}), avg {:.2}ms/frame",
            self.backend,
            self.frames_encoded,
            self.layers_encoded,
            self.frames_dropped(),
            self.bitrate_kbps,
            self.target_bitrate_kbps,
            self.avg_encode_time_ms
        )
    }
}

impl Default for EncoderStats {
    fn default() -> Self {
        Self::new("unknown", 0)
    }
}

/// Timing helper for measuring encode operations
pub struct EncodeTimer {
    start: Instant,
}

impl EncodeTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f32 {
        self.start.elapsed().as_secs_f32() * 1000.0
    }
}
