//! QP-driven resolution adaptation

use tracing::{debug, trace};

use crate::encoder::ScalingSettings;

/// Recommendation for the next frames' resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// QP above the high threshold: quality too poor for this resolution
    Downscale,
    /// QP below the low threshold: headroom for more pixels
    Upscale,
    Hold,
}

impl std::fmt::Display for ScaleDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Downscale => write!(f, "downscale"),
            Self::Upscale => write!(f, "upscale"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Maps reported QP values to scale decisions
///
/// Rebuilt (or updated via [`QualityScaler::update_settings`]) from every
/// fresh `EncoderInfo`, since thresholds change when an encoder falls
/// back to another implementation.
#[derive(Debug, Clone)]
pub struct QualityScaler {
    settings: ScalingSettings,
    downscales: u64,
    upscales: u64,
}

impl QualityScaler {
    pub fn new(settings: ScalingSettings) -> Self {
        Self {
            settings,
            downscales: 0,
            upscales: 0,
        }
    }

    pub fn settings(&self) -> &ScalingSettings {
        &self.settings
    }

    pub fn update_settings(&mut self, settings: ScalingSettings) {
        if settings != self.settings {
            debug!(
                "Quality scaler thresholds changed: {:?} -> {:?}",
                self.settings.thresholds, settings.thresholds
            );
            self.settings = settings;
        }
    }

    /// Evaluate the QP of one encoded frame at `width` x `height`
    ///
    /// Upscale is only recommended above the minimum pixel count.
    /// Downscale is always recommended on poor quality; the floor is
    /// applied by [`QualityScaler::scaled_down_resolution`].
    pub fn on_encoded_qp(&mut self, qp: i32, width: u32, height: u32) -> ScaleDecision {
        let Some(thresholds) = self.settings.thresholds else {
            return ScaleDecision::Hold;
        };

        let pixels = width as u64 * height as u64;
        let above_floor = pixels > self.settings.min_pixels_per_frame as u64;

        let decision = if qp > thresholds.high {
            self.downscales += 1;
            ScaleDecision::Downscale
        } else if qp < thresholds.low && above_floor {
            self.upscales += 1;
            ScaleDecision::Upscale
        } else {
            ScaleDecision::Hold
        };

        trace!(
            "qp={} at {}x{} (thresholds {}..{}) -> {}",
            qp,
            width,
            height,
            thresholds.low,
            thresholds.high,
            decision
        );
        decision
    }

    /// Next lower resolution: 3/4 per dimension, even, and never below
    /// the minimum pixel count. Returns the input when already at the
    /// floor.
    pub fn scaled_down_resolution(&self, width: u32, height: u32) -> (u32, u32) {
        let min_pixels = self.settings.min_pixels_per_frame as u64;
        let new_width = (width * 3 / 4) & !1;
        let new_height = (height * 3 / 4) & !1;

        if new_width == 0
            || new_height == 0
            || (new_width as u64 * new_height as u64) < min_pixels
        {
            return (width, height);
        }
        (new_width, new_height)
    }

    pub fn downscales(&self) -> u64 {
        self.downscales
    }

    pub fn upscales(&self) -> u64 {
        self.upscales
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_always_holds() {
        let mut scaler = QualityScaler::new(ScalingSettings::OFF);
        assert_eq!(scaler.on_encoded_qp(100, 1920, 1080), ScaleDecision::Hold);
        assert_eq!(scaler.on_encoded_qp(0, 1920, 1080), ScaleDecision::Hold);
    }

    #[test]
    fn test_thresholds_24_37() {
        let mut scaler = QualityScaler::new(ScalingSettings::new(24, 37));

        assert_eq!(scaler.on_encoded_qp(40, 640, 360), ScaleDecision::Downscale);
        assert_eq!(scaler.on_encoded_qp(20, 640, 360), ScaleDecision::Upscale);
        assert_eq!(scaler.on_encoded_qp(30, 640, 360), ScaleDecision::Hold);
        // boundaries are inclusive of Hold
        assert_eq!(scaler.on_encoded_qp(37, 640, 360), ScaleDecision::Hold);
        assert_eq!(scaler.on_encoded_qp(24, 640, 360), ScaleDecision::Hold);

        assert_eq!(scaler.downscales(), 1);
        assert_eq!(scaler.upscales(), 1);
    }

    #[test]
    fn test_floor_blocks_upscale_only() {
        let mut scaler = QualityScaler::new(ScalingSettings::new(24, 37));
        // exactly 320x180 is not above the floor
        assert_eq!(scaler.on_encoded_qp(20, 320, 180), ScaleDecision::Hold);
        assert_eq!(scaler.on_encoded_qp(40, 320, 180), ScaleDecision::Downscale);
        // the resolution itself stays clamped at the floor
        assert_eq!(scaler.scaled_down_resolution(320, 180), (320, 180));
    }

    #[test]
    fn test_scaled_down_resolution() {
        let scaler = QualityScaler::new(ScalingSettings::new(24, 37));
        assert_eq!(scaler.scaled_down_resolution(1280, 720), (960, 540));
        assert_eq!(scaler.scaled_down_resolution(640, 360), (480, 270));
        assert_eq!(scaler.scaled_down_resolution(480, 270), (360, 202));
        // 270x150 would fall below 320x180 worth of pixels
        assert_eq!(scaler.scaled_down_resolution(360, 202), (360, 202));
    }

    #[test]
    fn test_update_settings() {
        let mut scaler = QualityScaler::new(ScalingSettings::OFF);
        scaler.update_settings(ScalingSettings::new(24, 37));
        assert!(scaler.settings().is_enabled());
        assert_eq!(scaler.on_encoded_qp(40, 640, 360), ScaleDecision::Downscale);
    }
}
