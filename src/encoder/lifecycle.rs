//! Encoder lifecycle state machine
//!
//! ```text
//!                 init_encode()
//!  Uninitialized ───────────────> Initialized
//!        ▲                          │     ▲
//!        │                 release()│     │init_encode()
//!        │                          ▼     │
//!        └──────────────────────  Released
//! ```
//!
//! Backends embed a `Lifecycle` and consult it at the top of every
//! contract method, so protocol violations are reported identically by
//! all of them: `encode()` outside `Initialized` is always
//! `NotInitialized`, `release()` outside `Initialized` is a no-op, and
//! `init_encode()` while `Initialized` is rejected until released.

use tracing::debug;

use crate::codec::VideoCodec;

use super::{EncoderError, EncoderResult};

/// Lifecycle state of one encoder instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Uninitialized,
    Initialized,
    Released,
}

impl std::fmt::Display for EncoderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Released => write!(f, "released"),
        }
    }
}

/// Arguments of the last successful `init_encode()`
#[derive(Debug, Clone, PartialEq)]
pub struct InitParams {
    pub settings: VideoCodec,
    pub number_of_cores: u32,
    /// Usually network MTU minus protocol overhead
    pub max_payload_size: usize,
}

impl InitParams {
    pub fn max_framerate(&self) -> f64 {
        self.settings.max_framerate as f64
    }
}

/// State tracker shared by every backend
#[derive(Debug)]
pub struct Lifecycle {
    backend: &'static str,
    state: EncoderState,
    params: Option<InitParams>,
}

impl Lifecycle {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            state: EncoderState::Uninitialized,
            params: None,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == EncoderState::Initialized
    }

    /// Validate an `init_encode()` call without changing state
    pub fn check_init(
        &self,
        settings: &VideoCodec,
        number_of_cores: u32,
        max_payload_size: usize,
    ) -> EncoderResult<()> {
        if self.is_initialized() {
            return Err(EncoderError::InvalidParameter(format!(
                "{} encoder already initialized, release() first",
                self.backend
            )));
        }
        if number_of_cores == 0 {
            return Err(EncoderError::InvalidParameter(
                "number_of_cores must be at least 1".to_string(),
            ));
        }
        if max_payload_size == 0 {
            return Err(EncoderError::InvalidParameter(
                "max_payload_size must be non-zero".to_string(),
            ));
        }
        settings.validate()
    }

    /// Record a successful initialization
    pub fn mark_initialized(
        &mut self,
        settings: VideoCodec,
        number_of_cores: u32,
        max_payload_size: usize,
    ) {
        debug!(
            "{}: {} -> initialized ({}x{} {}, cores={}, max_payload={})",
            self.backend,
            self.state,
            settings.width,
            settings.height,
            settings.codec_type,
            number_of_cores,
            max_payload_size
        );
        self.params = Some(InitParams {
            settings,
            number_of_cores,
            max_payload_size,
        });
        self.state = EncoderState::Initialized;
    }

    /// Init parameters, or `NotInitialized` outside the `Initialized` state
    pub fn params(&self) -> EncoderResult<&InitParams> {
        match (&self.state, &self.params) {
            (EncoderState::Initialized, Some(params)) => Ok(params),
            _ => Err(EncoderError::NotInitialized),
        }
    }

    /// Move to `Released`. Returns `false` when there was nothing to release.
    pub fn mark_released(&mut self) -> bool {
        if !self.is_initialized() {
            return false;
        }
        debug!("{}: initialized -> released", self.backend);
        self.state = EncoderState::Released;
        self.params = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecType;

    fn settings() -> VideoCodec {
        VideoCodec::new(CodecType::Vp8, 320, 180)
    }

    #[test]
    fn test_initial_state() {
        let lifecycle = Lifecycle::new("test");
        assert_eq!(lifecycle.state(), EncoderState::Uninitialized);
        assert_eq!(lifecycle.params(), Err(EncoderError::NotInitialized));
    }

    #[test]
    fn test_init_release_cycle() {
        let mut lifecycle = Lifecycle::new("test");
        lifecycle.check_init(&settings(), 4, 1200).unwrap();
        lifecycle.mark_initialized(settings(), 4, 1200);
        assert_eq!(lifecycle.params().unwrap().max_payload_size, 1200);
        assert_eq!(lifecycle.params().unwrap().max_framerate(), 30.0);

        assert!(lifecycle.mark_released());
        assert_eq!(lifecycle.state(), EncoderState::Released);
        assert_eq!(lifecycle.params(), Err(EncoderError::NotInitialized));

        // second release is a no-op
        assert!(!lifecycle.mark_released());

        // re-init allowed after release
        assert!(lifecycle.check_init(&settings(), 4, 1200).is_ok());
    }

    #[test]
    fn test_double_init_rejected() {
        let mut lifecycle = Lifecycle::new("test");
        lifecycle.mark_initialized(settings(), 1, 1200);
        assert!(matches!(
            lifecycle.check_init(&settings(), 1, 1200),
            Err(EncoderError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_bad_init_arguments() {
        let lifecycle = Lifecycle::new("test");
        assert!(lifecycle.check_init(&settings(), 0, 1200).is_err());
        assert!(lifecycle.check_init(&settings(), 1, 0).is_err());
    }
}
