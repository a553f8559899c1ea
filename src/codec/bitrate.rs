//! Per-layer bitrate allocation and data rate units

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{MAX_SPATIAL_LAYERS, MAX_TEMPORAL_STREAMS};

/// A data rate in bits per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DataRate(u64);

impl DataRate {
    /// Zero bits per second
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create from bits per second
    pub const fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    /// Create from kilobits per second
    pub const fn from_kbps(kbps: u64) -> Self {
        Self(kbps * 1000)
    }

    /// Bits per second
    pub const fn bps(&self) -> u64 {
        self.0
    }

    /// Kilobits per second, rounded to nearest
    pub const fn kbps(&self) -> u64 {
        (self.0 + 500) / 1000
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1000 {
            write!(f, "{} kbps", self.kbps())
        } else {
            write!(f, "{} bps", self.0)
        }
    }
}

/// Target bitrate per (spatial, temporal) layer
///
/// A layer that was never set, or was set to zero, must not be encoded.
/// Temporal bitrates are stored per layer (not cumulative); the sum over
/// a spatial layer is the bitrate of the full spatial stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoBitrateAllocation {
    bitrates: [[Option<u32>; MAX_TEMPORAL_STREAMS]; MAX_SPATIAL_LAYERS],
}

impl VideoBitrateAllocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocation with a single layer (0, 0) at `bitrate_bps`
    pub fn single_layer(bitrate_bps: u32) -> Self {
        let mut allocation = Self::default();
        allocation.set_bitrate(0, 0, bitrate_bps);
        allocation
    }

    /// Set the bitrate of one layer.
    ///
    /// Returns `false` (and leaves the allocation untouched) when the
    /// indices are out of range or the new total would overflow `u32`.
    pub fn set_bitrate(
        &mut self,
        spatial_index: usize,
        temporal_index: usize,
        bitrate_bps: u32,
    ) -> bool {
        if spatial_index >= MAX_SPATIAL_LAYERS || temporal_index >= MAX_TEMPORAL_STREAMS {
            return false;
        }

        let previous = self.bitrates[spatial_index][temporal_index].unwrap_or(0) as u64;
        let new_sum = self.sum_bps() - previous + bitrate_bps as u64;
        if new_sum > u32::MAX as u64 {
            return false;
        }

        self.bitrates[spatial_index][temporal_index] = Some(bitrate_bps);
        true
    }

    /// Bitrate of one layer in bps (0 when unset or out of range)
    pub fn get_bitrate(&self, spatial_index: usize, temporal_index: usize) -> u32 {
        self.bitrates
            .get(spatial_index)
            .and_then(|layer| layer.get(temporal_index))
            .copied()
            .flatten()
            .unwrap_or(0)
    }

    /// Whether a bitrate has been set for this layer (zero counts as set)
    pub fn has_bitrate(&self, spatial_index: usize, temporal_index: usize) -> bool {
        self.bitrates
            .get(spatial_index)
            .and_then(|layer| layer.get(temporal_index))
            .map(|b| b.is_some())
            .unwrap_or(false)
    }

    pub fn sum_bps(&self) -> u64 {
        self.bitrates
            .iter()
            .flatten()
            .map(|b| b.unwrap_or(0) as u64)
            .sum()
    }

    /// Sum in kbps, rounded to nearest
    pub fn sum_kbps(&self) -> u32 {
        ((self.sum_bps() + 500) / 1000) as u32
    }

    /// Sum of all temporal layers of one spatial layer
    pub fn spatial_layer_sum(&self, spatial_index: usize) -> u32 {
        self.bitrates
            .get(spatial_index)
            .map(|layer| layer.iter().map(|b| b.unwrap_or(0)).sum())
            .unwrap_or(0)
    }

    /// Cumulative bitrates of the temporal layers of one spatial layer
    ///
    /// Entry `i` holds the bitrate needed to decode temporal layers
    /// `0..=i`. Trailing unset layers are omitted.
    pub fn temporal_layer_allocation(&self, spatial_index: usize) -> Vec<u32> {
        let Some(layer) = self.bitrates.get(spatial_index) else {
            return Vec::new();
        };

        let defined = layer.iter().rposition(|b| b.is_some()).map_or(0, |i| i + 1);
        let mut acc = 0u32;
        layer[..defined]
            .iter()
            .map(|b| {
                acc = acc.saturating_add(b.unwrap_or(0));
                acc
            })
            .collect()
    }

    /// A spatial layer is used when any of its temporal layers has a
    /// non-zero bitrate
    pub fn is_spatial_layer_used(&self, spatial_index: usize) -> bool {
        self.spatial_layer_sum(spatial_index) > 0
    }

    /// Indices of the spatial layers that must be encoded
    pub fn active_spatial_layers(&self) -> Vec<usize> {
        (0..MAX_SPATIAL_LAYERS)
            .filter(|&s| self.is_spatial_layer_used(s))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sum_bps() == 0
    }
}

impl fmt::Display for VideoBitrateAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VideoBitrateAllocation [")?;
        let mut first = true;
        for s in 0..MAX_SPATIAL_LAYERS {
            if !self.bitrates[s].iter().any(|b| b.is_some()) {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "S{}: [", s)?;
            let layers: Vec<String> = self.bitrates[s]
                .iter()
                .map_while(|b| b.map(|bps| bps.to_string()))
                .collect();
            write!(f, "{}]", layers.join(", "))?;
        }
        write!(f, "] total={}", DataRate::from_bps(self.sum_bps()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unset_layer_is_zero() {
        let allocation = VideoBitrateAllocation::new();
        assert_eq!(allocation.get_bitrate(0, 0), 0);
        assert!(!allocation.has_bitrate(0, 0));
        assert!(allocation.is_empty());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut allocation = VideoBitrateAllocation::new();
        assert!(!allocation.set_bitrate(MAX_SPATIAL_LAYERS, 0, 1000));
        assert!(!allocation.set_bitrate(0, MAX_TEMPORAL_STREAMS, 1000));
        assert_eq!(allocation.get_bitrate(MAX_SPATIAL_LAYERS, 0), 0);
        assert!(allocation.is_empty());
    }

    #[test]
    fn test_overflow_rejected() {
        let mut allocation = VideoBitrateAllocation::new();
        assert!(allocation.set_bitrate(0, 0, u32::MAX));
        assert!(!allocation.set_bitrate(1, 0, 1));
        assert_eq!(allocation.sum_bps(), u32::MAX as u64);
    }

    #[test]
    fn test_zero_layer_not_used() {
        let mut allocation = VideoBitrateAllocation::new();
        allocation.set_bitrate(0, 0, 100_000);
        allocation.set_bitrate(1, 0, 0);

        assert!(allocation.has_bitrate(1, 0));
        assert!(allocation.is_spatial_layer_used(0));
        assert!(!allocation.is_spatial_layer_used(1));
        assert_eq!(allocation.active_spatial_layers(), vec![0]);
    }

    #[test]
    fn test_sums() {
        let mut allocation = VideoBitrateAllocation::new();
        allocation.set_bitrate(0, 0, 60_000);
        allocation.set_bitrate(0, 1, 40_000);
        allocation.set_bitrate(1, 0, 300_400);

        assert_eq!(allocation.spatial_layer_sum(0), 100_000);
        assert_eq!(allocation.sum_bps(), 400_400);
        assert_eq!(allocation.sum_kbps(), 400);
        assert_eq!(allocation.temporal_layer_allocation(0), vec![60_000, 100_000]);
        assert_eq!(allocation.temporal_layer_allocation(1), vec![300_400]);
        assert!(allocation.temporal_layer_allocation(2).is_empty());
    }

    #[test]
    fn test_display() {
        let allocation = VideoBitrateAllocation::single_layer(250_000);
        let text = allocation.to_string();
        assert!(text.contains("S0: [250000]"));
        assert!(text.contains("250 kbps"));
    }

    #[test]
    fn test_data_rate_units() {
        assert_eq!(DataRate::from_kbps(120).bps(), 120_000);
        assert_eq!(DataRate::from_bps(1499).kbps(), 1);
        assert!(DataRate::zero().is_zero());
        assert_eq!(DataRate::from_bps(800).to_string(), "800 bps");
    }

    proptest! {
        #[test]
        fn prop_sum_matches_layers(
            rates in proptest::collection::vec(
                (0usize..MAX_SPATIAL_LAYERS, 0usize..MAX_TEMPORAL_STREAMS, 0u32..10_000_000),
                0..20,
            )
        ) {
            let mut allocation = VideoBitrateAllocation::new();
            for (s, t, bps) in &rates {
                allocation.set_bitrate(*s, *t, *bps);
            }

            let by_layer: u64 = (0..MAX_SPATIAL_LAYERS)
                .map(|s| allocation.spatial_layer_sum(s) as u64)
                .sum();
            prop_assert_eq!(by_layer, allocation.sum_bps());

            for s in 0..MAX_SPATIAL_LAYERS {
                let cumulative = allocation.temporal_layer_allocation(s);
                prop_assert!(cumulative.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }
}
