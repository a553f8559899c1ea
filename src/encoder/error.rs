//! Error taxonomy of the encoder contract
//!
//! Every backend reports failures through `EncoderError`, so the pipeline
//! can decide between fixing its input, falling back to another backend,
//! or treating the failure as its own bug. Backend internals keep richer
//! errors (`HardwareBackendError`) and convert at the contract boundary.

use thiserror::Error;

/// Errors returned synchronously by `VideoEncoder` methods
///
/// Per-frame delivery failures are not errors of this type; they travel
/// back through `CallbackResult` and never abort the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncoderError {
    /// Malformed or unsupported settings, frame types or frames.
    /// Retrying without changing the input fails again.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Allocation or hardware-context failure. May succeed after backoff,
    /// or on a different (software) backend.
    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    /// The encoder was used before `init_encode` or after `release`
    #[error("Encoder not initialized")]
    NotInitialized,

    /// The rate-control shim chain reached a method the backend does not
    /// implement
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),
}

impl EncoderError {
    /// Whether the pipeline should retry on another backend
    pub fn should_fallback(&self) -> bool {
        matches!(self, EncoderError::InsufficientResources(_))
    }

    /// Whether this error can only come from the caller violating the
    /// lifecycle protocol
    pub fn is_caller_bug(&self) -> bool {
        matches!(self, EncoderError::NotInitialized)
    }
}

/// Result type for encoder contract operations
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Internal errors of the hardware-accelerated backend
#[derive(Debug, Error)]
pub enum HardwareBackendError {
    /// Every hardware encode session is in use
    #[error("Hardware session limit reached ({active}/{max})")]
    SessionLimitReached { active: usize, max: usize },

    /// Resolution outside what the hardware can encode
    #[error("Unsupported resolution {width}x{height} (max {max_pixels} pixels)")]
    UnsupportedResolution {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    /// No queue slot freed up in time
    #[error("Submit queue full after {timeout_ms}ms")]
    QueueFull { timeout_ms: u64 },

    /// The worker thread exited unexpectedly
    #[error("Encoder worker unavailable")]
    WorkerGone,

    /// The worker thread could not be spawned
    #[error("Failed to spawn encoder worker: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

impl From<HardwareBackendError> for EncoderError {
    fn from(err: HardwareBackendError) -> Self {
        match err {
            HardwareBackendError::UnsupportedResolution { .. } => {
                EncoderError::InvalidParameter(err.to_string())
            }
            HardwareBackendError::SessionLimitReached { .. }
            | HardwareBackendError::QueueFull { .. }
            | HardwareBackendError::WorkerGone
            | HardwareBackendError::SpawnFailed(_) => {
                EncoderError::InsufficientResources(err.to_string())
            }
        }
    }
}
