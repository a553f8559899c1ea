//! Codec data model shared by the encoder contract
//!
//! These are the boundary types exchanged between the pipeline and an
//! encoder backend: raw input frames, codec settings, per-layer bitrate
//! allocations, and the encoded output with its per-frame metadata.
//!
//! Nothing here knows about a concrete bitstream format. Backends fill
//! `EncodedImage::data` with whatever their codec produces; the
//! packetizer reads it through `FragmentationHeader`.

mod bitrate;
mod encoded;
mod frame;
mod settings;

pub use bitrate::{DataRate, VideoBitrateAllocation};
pub use encoded::{CodecSpecificInfo, EncodedImage, FragmentationHeader};
pub use frame::{PixelFormat, VideoFrame, VideoFrameType};
pub use settings::{
    CodecType, ContentMode, H264Settings, InterLayerPrediction, SpatialLayer, VideoCodec,
    Vp8Settings, Vp9Settings,
};

/// Maximum number of spatial layers (SVC) a single encoder may produce
pub const MAX_SPATIAL_LAYERS: usize = 5;

/// Maximum number of temporal layers within one spatial layer
pub const MAX_TEMPORAL_STREAMS: usize = 4;

/// Maximum number of simulcast streams
pub const MAX_SIMULCAST_STREAMS: usize = 3;
