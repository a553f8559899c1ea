//! Media-optimization frame dropper
//!
//! Tracks delivered bytes against the target bitrate and asks the
//! encoder to skip the next frame (through `drop_next_frame` in the
//! callback result) while the output runs ahead of the target. Disabled
//! for encoders that report a trusted rate controller.

use std::time::Duration;

use tracing::trace;

use crate::quality::LeakyBucket;

#[derive(Debug, Clone)]
pub struct FrameDropper {
    bucket: LeakyBucket,
    enabled: bool,
    framerate: f64,
    drop_requests: u64,
}

impl FrameDropper {
    pub fn new(window: Duration) -> Self {
        Self {
            bucket: LeakyBucket::new(0, window),
            enabled: true,
            framerate: 30.0,
            drop_requests: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            trace!("Frame dropper {}", if enabled { "enabled" } else { "disabled" });
            self.enabled = enabled;
            self.bucket.reset();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// New target; a framerate <= 0 keeps the previous one
    pub fn set_target(&mut self, bitrate_bps: u64, framerate: f64) {
        self.bucket.set_rate(bitrate_bps);
        if framerate > 0.0 {
            self.framerate = framerate;
        }
    }

    /// Account for one delivered picture; returns true when the next
    /// frame should be dropped
    pub fn on_picture(&mut self, bytes: usize) -> bool {
        if !self.enabled {
            return false;
        }
        self.bucket
            .leak(Duration::from_secs_f64(1.0 / self.framerate.max(1.0)));
        self.bucket.fill(bytes);

        if self.bucket.rate_bps() > 0 && self.bucket.is_overflowing() {
            self.drop_requests += 1;
            trace!(
                "Output ahead of target ({:.0}/{:.0} bytes), dropping next frame",
                self.bucket.level_bytes(),
                self.bucket.capacity_bytes()
            );
            return true;
        }
        false
    }

    /// Account for a frame that was dropped: time passes, no bytes added
    pub fn on_dropped(&mut self) {
        self.bucket
            .leak(Duration::from_secs_f64(1.0 / self.framerate.max(1.0)));
    }

    pub fn drop_requests(&self) -> u64 {
        self.drop_requests
    }
}
