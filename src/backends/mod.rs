//! Encoder backends and backend selection
//!
//! | Backend       | Rate call level | Delivery        | Trusted RC |
//! |---------------|-----------------|-----------------|------------|
//! | `Software`    | Allocation      | inside encode() | no         |
//! | `Hardware`    | Structured      | worker thread   | yes        |
//! | `Passthrough` | Legacy          | inside encode() | no         |
//!
//! # Selection
//!
//! `auto` picks the hardware backend when the device has a free session
//! and the software backend otherwise. With `fallback_to_software`, a
//! hardware encoder is wrapped in [`SoftwareFallbackEncoder`] so resource
//! failures at init or encode time switch to software transparently.

mod hardware;
mod model;
mod passthrough;
mod software;
mod stats;

pub use hardware::{
    intra_refresh_period, HardwareDevice, HardwareEncoder, HardwareEncoderConfig,
    DEFAULT_MAX_SESSIONS, HARDWARE_IMPLEMENTATION_NAME,
};
pub use passthrough::{PassthroughEncoder, PASSTHROUGH_IMPLEMENTATION_NAME};
pub use software::{SoftwareEncoder, SOFTWARE_IMPLEMENTATION_NAME};
pub use stats::{EncodeTimer, EncoderStats};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::encoder::{EncoderError, EncoderResult, SoftwareFallbackEncoder, VideoEncoder};

/// Backend choice from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Hardware when available, else software
    Auto,
    Software,
    Hardware,
    Passthrough,
}

impl BackendKind {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "software" | "sw" => Some(Self::Software),
            "hardware" | "hw" => Some(Self::Hardware),
            "passthrough" => Some(Self::Passthrough),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Software => write!(f, "software"),
            Self::Hardware => write!(f, "hardware"),
            Self::Passthrough => write!(f, "passthrough"),
        }
    }
}

/// Create the encoder named by `config.encoder.backend`
///
/// Hardware encoders share the process-wide [`HardwareDevice`].
///
/// # Errors
///
/// `InvalidParameter` for an unknown backend name.
pub fn create_encoder(config: &Config) -> EncoderResult<Box<dyn VideoEncoder>> {
    let kind = BackendKind::from_str(&config.encoder.backend).ok_or_else(|| {
        EncoderError::InvalidParameter(format!("unknown backend '{}'", config.encoder.backend))
    })?;
    let device = HardwareDevice::system(config.hardware.max_sessions);
    Ok(create_encoder_on(kind, config, device))
}

/// Create an encoder of `kind`, drawing hardware sessions from `device`
pub fn create_encoder_on(
    kind: BackendKind,
    config: &Config,
    device: HardwareDevice,
) -> Box<dyn VideoEncoder> {
    debug!(
        "Creating {} encoder (fallback_to_software={}, device sessions {}/{})",
        kind,
        config.encoder.fallback_to_software,
        device.active_sessions(),
        device.max_sessions()
    );

    match kind {
        BackendKind::Software => Box::new(SoftwareEncoder::new(config.software_scaling())),
        BackendKind::Passthrough => Box::new(PassthroughEncoder::new()),
        BackendKind::Hardware => hardware_encoder(config, device),
        BackendKind::Auto if device.is_available() => hardware_encoder(config, device),
        BackendKind::Auto => {
            info!(
                "No free hardware session ({}/{}), using software encoder",
                device.active_sessions(),
                device.max_sessions()
            );
            Box::new(SoftwareEncoder::new(config.software_scaling()))
        }
    }
}

fn hardware_encoder(config: &Config, device: HardwareDevice) -> Box<dyn VideoEncoder> {
    let encoder = HardwareEncoder::new(config.hardware_encoder_config(), device);
    if config.encoder.fallback_to_software {
        Box::new(SoftwareFallbackEncoder::new(
            Box::new(encoder),
            Box::new(SoftwareEncoder::new(config.software_scaling())),
        ))
    } else {
        Box::new(encoder)
    }
}

/// Backend availability snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendProbe {
    pub software: bool,
    pub hardware: bool,
    pub passthrough: bool,
    pub hardware_sessions_active: usize,
    pub hardware_sessions_max: usize,
}

/// Check which backends could be initialized right now
///
/// Does not open a session.
pub fn probe_backends(device: &HardwareDevice) -> BackendProbe {
    let probe = BackendProbe {
        software: true,
        hardware: device.is_available(),
        passthrough: true,
        hardware_sessions_active: device.active_sessions(),
        hardware_sessions_max: device.max_sessions(),
    };
    debug!(
        "Backend probe: hardware={} ({}/{} sessions)",
        probe.hardware, probe.hardware_sessions_active, probe.hardware_sessions_max
    );
    probe
}
