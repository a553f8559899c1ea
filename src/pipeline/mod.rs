//! Send-pipeline side of the encoder contract
//!
//! The pieces a caller wraps around a `VideoEncoder`: capability
//! re-reading, the media-optimization frame dropper and a session type
//! that ties them to the result channel.

mod capabilities;
mod dropper;
mod session;

pub use capabilities::CapabilityTracker;
pub use dropper::FrameDropper;
pub use session::EncoderSession;
