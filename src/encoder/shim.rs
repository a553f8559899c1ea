//! Translation between rate-control call shapes
//!
//! Three generations of the rate call exist:
//!
//! | Level        | Method                                   | Carries                          |
//! |--------------|------------------------------------------|----------------------------------|
//! | `Structured` | `set_rates(&RateControlParameters)`      | per-layer bitrate, fps, headroom |
//! | `Allocation` | `set_rate_allocation(&allocation, fps)`  | per-layer bitrate, integer fps   |
//! | `Legacy`     | `set_rates_legacy(kbps, fps)`            | total bitrate, integer fps       |
//!
//! A backend overrides exactly the level it understands. The default
//! methods of `VideoEncoder` translate downward only, using the functions
//! below, so a call at any level above the backend's own reaches it with
//! deterministic arguments. Below `Legacy` there is nothing safe to fall
//! back to, so the default `set_rates_legacy` fails with `NotImplemented`.
//!
//! Integer framerates of 0 mean "unspecified"; backends at the lower levels
//! treat 0 like `framerate_fps <= 0`.

use crate::codec::VideoBitrateAllocation;

use super::RateControlParameters;

/// Which rate call a backend implements natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateProtocol {
    Structured,
    Allocation,
    Legacy,
}

impl RateProtocol {
    /// Name of the method a backend at this level overrides
    pub fn entry_method(&self) -> &'static str {
        match self {
            Self::Structured => "set_rates",
            Self::Allocation => "set_rate_allocation",
            Self::Legacy => "set_rates_legacy",
        }
    }

    /// Methods traversed by a `set_rates()` call before reaching this level
    pub fn call_chain(&self) -> &'static [&'static str] {
        match self {
            Self::Structured => &["set_rates"],
            Self::Allocation => &["set_rates", "set_rate_allocation"],
            Self::Legacy => &["set_rates", "set_rate_allocation", "set_rates_legacy"],
        }
    }

    /// Whether per-layer bitrates survive the translation to this level
    pub fn preserves_layers(&self) -> bool {
        !matches!(self, Self::Legacy)
    }

    /// Whether bandwidth headroom survives the translation to this level
    pub fn preserves_headroom(&self) -> bool {
        matches!(self, Self::Structured)
    }
}

impl std::fmt::Display for RateProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured => write!(f, "structured"),
            Self::Allocation => write!(f, "allocation"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// `Structured` → `Allocation`: drop the headroom, round the framerate
pub fn structured_to_allocation(
    parameters: &RateControlParameters) -> (&VideoBitrateAllocation, u32,
) {
    (&parameters.bitrate, parameters.framerate_u32())
}

/// `Allocation` → `Legacy`: flatten the layers into a kbps total
pub fn allocation_to_legacy(allocation: &VideoBitrateAllocation, framerate: u32) -> (u32, u32) {
    (allocation.sum_kbps(), framerate)
}
