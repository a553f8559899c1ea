//! Rate control parameters pushed by the pipeline

use tracing::debug;

use crate::codec::{DataRate, VideoBitrateAllocation};

/// Instantaneous rate targets, valid from one `set_rates()` call to the next
///
/// Each call supersedes all earlier rate state. Backends must not average
/// across calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RateControlParameters {
    /// Target bitrate per spatial/temporal layer. A zero layer is not encoded.
    pub bitrate: VideoBitrateAllocation,

    /// Target framerate in fps. Values <= 0 mean "not available"; the
    /// encoder then uses the max framerate of its last `init_encode()`.
    pub framerate_fps: f64,

    /// Network bandwidth available for video. At least `bitrate.sum_bps()`,
    /// higher when the application is not network constrained.
    pub bandwidth_allocation: DataRate,
}

impl RateControlParameters {
    /// Build parameters, raising the bandwidth to the allocation sum when
    /// it was given lower
    pub fn new(
        bitrate: VideoBitrateAllocation,
        framerate_fps: f64,
        bandwidth_allocation: DataRate,
    ) -> Self {
        let sum = DataRate::from_bps(bitrate.sum_bps());
        let bandwidth_allocation = if bandwidth_allocation < sum {
            debug!(
                "Bandwidth {} below allocation sum {}, raising to sum",
                bandwidth_allocation, sum
            );
            sum
        } else {
            bandwidth_allocation
        };

        Self {
            bitrate,
            framerate_fps,
            bandwidth_allocation,
        }
    }

    /// Parameters whose bandwidth equals the allocation sum
    pub fn from_allocation(bitrate: VideoBitrateAllocation, framerate_fps: f64) -> Self {
        let sum = DataRate::from_bps(bitrate.sum_bps());
        Self::new(bitrate, framerate_fps, sum)
    }

    /// Whether a target framerate was supplied
    pub fn has_framerate(&self) -> bool {
        self.framerate_fps > 0.0
    }

    /// Target framerate, or `fallback_fps` when unspecified
    pub fn effective_framerate(&self, fallback_fps: f64) -> f64 {
        if self.has_framerate() {
            self.framerate_fps
        } else {
            fallback_fps
        }
    }

    /// Framerate as passed to the integer-framerate rate calls
    pub(crate) fn framerate_u32(&self) -> u32 {
        if self.has_framerate() {
            self.framerate_fps.round().min(u32::MAX as f64) as u32
        } else {
            0
        }
    }

    /// Headroom above the allocation sum
    pub fn headroom(&self) -> DataRate {
        DataRate::from_bps(
            self.bandwidth_allocation
                .bps()
                .saturating_sub(self.bitrate.sum_bps()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_layers() -> VideoBitrateAllocation {
        let mut allocation = VideoBitrateAllocation::new();
        allocation.set_bitrate(0, 0, 100_000);
        allocation.set_bitrate(1, 0, 0);
        allocation
    }

    #[test]
    fn test_bandwidth_raised_to_sum() {
        let params = RateControlParameters::new(two_layers(), 30.0, DataRate::from_kbps(50));
        assert_eq!(params.bandwidth_allocation, DataRate::from_kbps(100));
        assert!(params.headroom().is_zero());
    }

    #[test]
    fn test_headroom() {
        let params = RateControlParameters::new(two_layers(), 30.0, DataRate::from_kbps(120));
        assert_eq!(params.headroom(), DataRate::from_kbps(20));
    }

    #[test]
    fn test_unspecified_framerate() {
        let params = RateControlParameters::from_allocation(two_layers(), 0.0);
        assert!(!params.has_framerate());
        assert_eq!(params.effective_framerate(24.0), 24.0);
        assert_eq!(params.framerate_u32(), 0);

        let params = RateControlParameters::from_allocation(two_layers(), -5.0);
        assert_eq!(params.effective_framerate(24.0), 24.0);
    }

    #[test]
    fn test_framerate_rounding() {
        let params = RateControlParameters::from_allocation(two_layers(), 29.97);
        assert_eq!(params.framerate_u32(), 30);
        assert_eq!(params.effective_framerate(60.0), 29.97);
    }
}
