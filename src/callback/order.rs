//! Per-layer delivery order checking

use std::collections::HashMap;

use crate::codec::{MAX_SPATIAL_LAYERS, MAX_TEMPORAL_STREAMS};

/// Tracks the last RTP timestamp delivered per (spatial, temporal) layer
///
/// Results for one layer must arrive in submission order; RTP timestamps
/// increase with submission order, so a timestamp that is not newer than
/// the previous one on the same layer is a reordering or a duplicate.
/// Comparison is modulo 2^32 to survive timestamp wraparound.
#[derive(Debug, Default)]
pub struct LayerOrderMonitor {
    last: HashMap<(u8, u8), u32>,
    violations: u64,
}

impl LayerOrderMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery. Returns `false` when it arrived out of order.
    pub fn observe(&mut self, spatial_index: u8, temporal_index: u8, rtp_timestamp: u32) -> bool {
        debug_assert!((spatial_index as usize) < MAX_SPATIAL_LAYERS);
        debug_assert!((temporal_index as usize) < MAX_TEMPORAL_STREAMS);

        let key = (spatial_index, temporal_index);
        let in_order = match self.last.get(&key) {
            Some(&previous) => is_newer(rtp_timestamp, previous),
            None => true,
        };

        if in_order {
            self.last.insert(key, rtp_timestamp);
        } else {
            self.violations += 1;
        }
        in_order
    }

    pub fn violations(&self) -> u64 {
        self.violations
    }

    /// Forget all layers, e.g. after the encoder was re-initialized
    pub fn reset(&mut self) {
        self.last.clear();
    }
}

fn is_newer(timestamp: u32, previous: u32) -> bool {
    let diff = timestamp.wrapping_sub(previous);
    diff != 0 && diff < 0x8000_0000
}
