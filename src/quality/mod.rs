//! Rate and quality adaptation helpers
//!
//! - [`QualityScaler`] turns per-frame QP into resolution recommendations
//!   using the thresholds an encoder advertises in `EncoderInfo`.
//! - [`LeakyBucket`] models a send buffer draining at the target bitrate;
//!   both the pipeline's frame dropper and encoders with a trusted rate
//!   controller use it to decide when to skip frames.

mod bucket;
mod scaler;

pub use bucket::LeakyBucket;
pub use scaler::{QualityScaler, ScaleDecision};
