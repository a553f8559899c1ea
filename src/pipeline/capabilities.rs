//! Versioned `EncoderInfo` snapshots

use tracing::info;

use crate::encoder::EncoderInfo;

/// Remembers the last capability snapshot and reports changes
///
/// Capabilities are re-read on every control iteration; a fallback from
/// hardware to software shows up here as a new version.
#[derive(Debug, Default)]
pub struct CapabilityTracker {
    current: Option<EncoderInfo>,
    version: u64,
}

impl CapabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `info`; returns the names of the fields that changed, empty
    /// when the snapshot is unchanged
    pub fn refresh(&mut self, info: EncoderInfo) -> Vec<&'static str> {
        let changed = match &self.current {
            Some(previous) => changed_fields(previous, &info),
            None => vec!["initial"],
        };

        if !changed.is_empty() {
            self.version += 1;
            info!(
                "Encoder capabilities v{}: '{}' hw={} trusted_rc={} scaling={:?} (changed: {})",
                self.version,
                info.implementation_name,
                info.is_hardware_accelerated,
                info.has_trusted_rate_controller,
                info.scaling_settings.thresholds,
                changed.join(", ")
            );
            self.current = Some(info);
        }
        changed
    }

    pub fn current(&self) -> Option<&EncoderInfo> {
        self.current.as_ref()
    }

    /// Number of distinct snapshots seen
    pub fn version(&self) -> u64 {
        self.version
    }
}

fn changed_fields(old: &EncoderInfo, new: &EncoderInfo) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old.implementation_name != new.implementation_name {
        changed.push("implementation_name");
    }
    if old.scaling_settings != new.scaling_settings {
        changed.push("scaling_settings");
    }
    if old.supports_native_handle != new.supports_native_handle {
        changed.push("supports_native_handle");
    }
    if old.has_trusted_rate_controller != new.has_trusted_rate_controller {
        changed.push("has_trusted_rate_controller");
    }
    if old.is_hardware_accelerated != new.is_hardware_accelerated {
        changed.push("is_hardware_accelerated");
    }
    if old.has_internal_source != new.has_internal_source {
        changed.push("has_internal_source");
    }
    if old.fps_allocation != new.fps_allocation {
        changed.push("fps_allocation");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::ScalingSettings;

    #[test]
    fn test_first_snapshot_is_a_change() {
        let mut tracker = CapabilityTracker::new();
        assert_eq!(tracker.refresh(EncoderInfo::default()), vec!["initial"]);
        assert_eq!(tracker.version(), 1);
        assert!(tracker.refresh(EncoderInfo::default()).is_empty());
        assert_eq!(tracker.version(), 1);
    }

    #[test]
    fn test_fallback_visible_as_change() {
        let mut tracker = CapabilityTracker::new();
        let hardware = EncoderInfo {
            implementation_name: "hw".to_string(),
            is_hardware_accelerated: true,
            has_trusted_rate_controller: true,
            ..EncoderInfo::default()
        };
        tracker.refresh(hardware);

        let software = EncoderInfo {
            implementation_name: "sw".to_string(),
            scaling_settings: ScalingSettings::new(24, 37),
            ..EncoderInfo::default()
        };
        let changed = tracker.refresh(software);
        assert!(changed.contains(&"implementation_name"));
        assert!(changed.contains(&"has_trusted_rate_controller"));
        assert!(changed.contains(&"scaling_settings"));
        assert!(!changed.contains(&"fps_allocation"));
        assert_eq!(tracker.version(), 2);
        assert!(!tracker.current().unwrap().is_hardware_accelerated);
    }
}
