//! # lamco-encoder-contract
//!
//! Encoder-side contract of a real-time video send pipeline.
//!
//! A [`encoder::VideoEncoder`] is initialized with codec settings,
//! accepts raw frames and delivers encoded images to a registered
//! [`callback::EncodedImageCallback`], possibly from its own thread. The
//! caller steers it with bitrate/framerate updates and network feedback
//! and reads back an [`encoder::EncoderInfo`] capability snapshot on
//! every control iteration.
//!
//! # Architecture
//!
//! ```text
//! lamco-encoder-contract
//!   ├─> codec      (settings, frames, encoded images, bitrate allocation)
//!   ├─> encoder    (trait, lifecycle, rate-call shim, software fallback)
//!   ├─> callback   (encode-complete sink, ordered result channel)
//!   ├─> backends   (software, hardware worker, passthrough)
//!   ├─> quality    (QP-driven scaler, leaky bucket)
//!   └─> pipeline   (session loop, frame dropper, capability tracking)
//! ```
//!
//! # Data Flow
//!
//! **Frames:** Caller → `encode()` → backend → callback → receiver
//!
//! **Control:** Caller → `set_rates()` → shim → backend rate level
//!
//! **Adaptation:** receiver → QP / bytes → quality scaler, frame dropper

#![warn(clippy::all)]

/// Encoder backends and backend selection
pub mod backends;

/// Encode-complete callback and result channel
pub mod callback;

/// Codec settings and media types
pub mod codec;

/// Configuration loading
pub mod config;

/// The `VideoEncoder` contract
pub mod encoder;

/// Caller-side adaptation around an encoder
pub mod pipeline;

/// Quality scaling and rate tracking primitives
pub mod quality;
