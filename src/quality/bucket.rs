//! Leaky bucket over encoded bytes

use std::time::Duration;

/// Bytes in, drained at a fixed bitrate
///
/// Time is advanced explicitly by the caller (usually one frame interval
/// per input frame), which keeps decisions independent of wall-clock
/// jitter.
#[derive(Debug, Clone)]
pub struct LeakyBucket {
    rate_bps: f64,
    window: Duration,
    /// Extra capacity as a multiple of the window (bandwidth headroom)
    capacity_scale: f64,
    level_bytes: f64,
}

impl LeakyBucket {
    /// Bucket draining at `rate_bps` that overflows after `window` worth
    /// of data has accumulated
    pub fn new(rate_bps: u64, window: Duration) -> Self {
        Self {
            rate_bps: rate_bps as f64,
            window,
            capacity_scale: 1.0,
            level_bytes: 0.0,
        }
    }

    pub fn set_rate(&mut self, rate_bps: u64) {
        self.rate_bps = rate_bps as f64;
    }

    /// Allow `scale` times the nominal window before overflowing
    pub fn set_capacity_scale(&mut self, scale: f64) {
        self.capacity_scale = scale.max(1.0);
    }

    pub fn rate_bps(&self) -> u64 {
        self.rate_bps as u64
    }

    pub fn capacity_bytes(&self) -> f64 {
        self.rate_bps / 8.0 * self.window.as_secs_f64() * self.capacity_scale
    }

    pub fn level_bytes(&self) -> f64 {
        self.level_bytes
    }

    /// Drain for `elapsed` at the current rate
    pub fn leak(&mut self, elapsed: Duration) {
        let drained = self.rate_bps / 8.0 * elapsed.as_secs_f64();
        self.level_bytes = (self.level_bytes - drained).max(0.0);
    }

    /// Account for `bytes` of produced output
    pub fn fill(&mut self, bytes: usize) {
        self.level_bytes += bytes as f64;
    }

    /// True when more than the capacity is buffered; with a zero rate any
    /// buffered data overflows
    pub fn is_overflowing(&self) -> bool {
        if self.rate_bps <= 0.0 {
            return self.level_bytes > 0.0;
        }
        self.level_bytes > self.capacity_bytes()
    }

    pub fn reset(&mut self) {
        self.level_bytes = 0.0;
    }
}
