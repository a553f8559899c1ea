//! Synthetic layered bitstream shared by the software and hardware backends
//!
//! The model does not compress pixels. It produces payloads whose size
//! follows the configured per-layer bitrate and frame rate, together with
//! the metadata a real codec would report (temporal pattern, key frames,
//! QP, fragmentation), so everything above the encoder can be exercised
//! end to end.
//!
//! Per-frame size of a layer is `bitrate / (framerate * share) / 8`, where
//! `share` is the fraction of frames the temporal layer carries:
//!
//! | temporal layers | pattern            | shares (T0, T1, ...)  |
//! |-----------------|--------------------|-----------------------|
//! | 1               | 0                  | 1                     |
//! | 2               | 0 1                | 1/2, 1/2              |
//! | 3               | 0 2 1 2            | 1/4, 1/4, 1/2         |
//! | 4               | 0 3 2 3 1 3 2 3    | 1/8, 1/8, 1/4, 1/2    |

use std::time::Duration;

use bytes::Bytes;
use tracing::trace;

use crate::codec::{
    CodecSpecificInfo, CodecType, EncodedImage, FragmentationHeader, SpatialLayer,
    VideoBitrateAllocation, VideoFrame, VideoFrameType, VideoCodec,
};
use crate::encoder::{EncoderError, EncoderResult, FpsAllocation, InitParams};

/// Smallest payload emitted for an encoded layer
const MIN_PAYLOAD_BYTES: usize = 16;

/// Largest payload emitted for an encoded layer
const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// Key frames cost this many delta frames
const KEY_FRAME_SIZE_FACTOR: f64 = 3.0;

/// QP reported at 0.1 bits per pixel
const REFERENCE_QP: f64 = 36.0;
const REFERENCE_BITS_PER_PIXEL: f64 = 0.1;

const TEMPORAL_PATTERNS: [&[u8]; 4] = [&[0], &[0, 1], &[0, 2, 1, 2], &[0, 3, 2, 3, 1, 3, 2, 3]];

/// Temporal layer of the `index`-th picture since the last key frame
pub(crate) fn temporal_index(num_temporal_layers: u8, index: u64) -> u8 {
    let pattern = temporal_pattern(num_temporal_layers);
    pattern[(index % pattern.len() as u64) as usize]
}

fn temporal_pattern(num_temporal_layers: u8) -> &'static [u8] {
    let n = (num_temporal_layers.max(1) as usize).min(TEMPORAL_PATTERNS.len());
    TEMPORAL_PATTERNS[n - 1]
}

/// Fraction of frames carried by temporal layer `tl`
pub(crate) fn temporal_share(num_temporal_layers: u8, tl: u8) -> f64 {
    let n = num_temporal_layers.max(1) as i32;
    if n == 1 {
        return 1.0;
    }
    let exponent = if tl == 0 { n - 1 } else { n - tl as i32 };
    1.0 / f64::from(1u32 << exponent.max(0))
}

/// QP a codec would settle on for `bits` spread over `pixels`
pub(crate) fn estimate_qp(bits: f64, pixels: u64, qp_max: i32) -> i32 {
    if pixels == 0 || bits <= 0.0 {
        return qp_max;
    }
    let bpp = bits / pixels as f64;
    let qp = REFERENCE_QP - 6.0 * (bpp / REFERENCE_BITS_PER_PIXEL).log2();
    (qp.round() as i32).clamp(1, qp_max.max(1))
}

/// Initial allocation before the first `set_rates`: each active layer at
/// its target bitrate, split over temporal layers by frame share
pub(crate) fn initial_allocation(settings: &VideoCodec) -> VideoBitrateAllocation {
    let mut allocation = VideoBitrateAllocation::new();
    let implicit = settings.spatial_layers.is_empty();

    for (s, layer) in settings.layers().iter().enumerate() {
        if !layer.active {
            continue;
        }
        let kbps = if implicit {
            settings.start_bitrate_kbps.max(settings.min_bitrate_kbps)
        } else {
            layer.target_bitrate_kbps
        };
        let total = kbps as f64 * 1000.0;
        for t in 0..layer.num_temporal_layers {
            let bps = (total * temporal_share(layer.num_temporal_layers, t)) as u32;
            allocation.set_bitrate(s, t as usize, bps);
        }
    }
    allocation
}

/// Frame-rate table matching the configured temporal layers
pub(crate) fn fps_allocation_for(settings: &VideoCodec) -> FpsAllocation {
    let counts: Vec<u8> = settings
        .layers()
        .iter()
        .map(|layer| layer.num_temporal_layers)
        .collect();
    FpsAllocation::from_temporal_layer_counts(&counts).unwrap_or_default()
}

/// Check per-layer frame type requests against the layer count
pub(crate) fn validate_frame_types(
    frame_types: Option<&[VideoFrameType]>,
    layer_count: usize,
) -> EncoderResult<()> {
    match frame_types {
        Some(types) if types.len() > layer_count => Err(EncoderError::InvalidParameter(format!(
            "{} frame types for {} spatial layers",
            types.len(),
            layer_count
        ))),
        _ => Ok(()),
    }
}

/// Requested type for spatial layer `s`; a shorter list repeats its last entry
fn requested_type(frame_types: Option<&[VideoFrameType]>, s: usize) -> VideoFrameType {
    frame_types
        .and_then(|types| types.get(s).or(types.last()))
        .copied()
        .unwrap_or_default()
}

/// One layer of one encoded picture
#[derive(Debug, Clone)]
pub(crate) struct LayerOutput {
    pub(crate) image: EncodedImage,
    pub(crate) info: CodecSpecificInfo,
    pub(crate) fragmentation: Option<FragmentationHeader>,
}

/// All layers produced for one input frame
#[derive(Debug, Clone, Default)]
pub(crate) struct EncodedPicture {
    pub(crate) layers: Vec<LayerOutput>,
    pub(crate) is_key: bool,
}

impl EncodedPicture {
    pub(crate) fn bytes(&self) -> usize {
        self.layers.iter().map(|l| l.image.size()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Per-instance encoder state driven by rates and frame requests
#[derive(Debug)]
pub(crate) struct LayerModel {
    codec_type: CodecType,
    layers: Vec<SpatialLayer>,
    qp_max: i32,
    key_frame_interval: u32,
    max_payload_size: usize,
    max_framerate: f64,
    allocation: VideoBitrateAllocation,
    framerate: f64,
    intra_refresh_period: Option<u32>,
    /// Position in the temporal pattern; advances on every submitted frame
    pattern_position: u64,
    /// Frames submitted since the last emitted key frame
    pictures_since_key: u64,
    key_pending: bool,
}

impl LayerModel {
    pub(crate) fn new(params: &InitParams) -> Self {
        let settings = &params.settings;
        Self {
            codec_type: settings.codec_type,
            layers: settings.layers(),
            qp_max: settings.qp_max.min(i32::MAX as u32) as i32,
            key_frame_interval: settings.key_frame_interval(),
            max_payload_size: params.max_payload_size,
            max_framerate: params.max_framerate(),
            allocation: initial_allocation(settings),
            framerate: params.max_framerate(),
            intra_refresh_period: None,
            pattern_position: 0,
            pictures_since_key: 0,
            key_pending: true,
        }
    }

    /// Replace the rate state. A framerate <= 0 selects the init maximum.
    /// Returns the framerate now in effect.
    pub(crate) fn set_rates(
        &mut self,
        allocation: &VideoBitrateAllocation,
        framerate_fps: f64,
    ) -> f64 {
        self.allocation = allocation.clone();
        self.framerate = if framerate_fps > 0.0 {
            framerate_fps
        } else {
            self.max_framerate
        };
        self.framerate
    }

    pub(crate) fn framerate(&self) -> f64 {
        self.framerate
    }

    pub(crate) fn allocation(&self) -> &VideoBitrateAllocation {
        &self.allocation
    }

    pub(crate) fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Duration of one frame at the current framerate
    pub(crate) fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.framerate.max(1.0))
    }

    /// Force a key frame at least every `period` pictures
    pub(crate) fn set_intra_refresh_period(&mut self, period: Option<u32>) {
        self.intra_refresh_period = period.filter(|&p| p > 0);
    }

    pub(crate) fn intra_refresh_period(&self) -> Option<u32> {
        self.intra_refresh_period
    }

    /// Whether the next picture will be a key frame
    pub(crate) fn next_is_key(&self, frame_types: Option<&[VideoFrameType]>) -> bool {
        let requested = frame_types
            .map(|types| types.contains(&VideoFrameType::Key))
            .unwrap_or(false);
        let interval_due = self.key_frame_interval > 0
            && self.pictures_since_key >= self.key_frame_interval as u64;
        let refresh_due = self
            .intra_refresh_period
            .is_some_and(|p| self.pictures_since_key >= p as u64);

        self.key_pending || requested || interval_due || refresh_due
    }

    /// Encode every layer of `frame` that has bitrate and was not
    /// requested `Empty`
    pub(crate) fn encode(
        &mut self,
        frame: &VideoFrame,
        frame_types: Option<&[VideoFrameType]>,
    ) -> EncodedPicture {
        let is_key = self.next_is_key(frame_types);
        let pattern_index = if is_key { 0 } else { self.pattern_position };
        let mut picture = EncodedPicture {
            layers: Vec::with_capacity(self.layers.len()),
            is_key,
        };

        for (s, layer) in self.layers.iter().enumerate() {
            if !layer.active || requested_type(frame_types, s) == VideoFrameType::Empty {
                continue;
            }
            let tl = temporal_index(layer.num_temporal_layers, pattern_index);
            let bitrate = self.allocation.get_bitrate(s, tl as usize);
            if bitrate == 0 {
                trace!("S{}T{} has zero bitrate, not encoded", s, tl);
                continue;
            }

            let share = temporal_share(layer.num_temporal_layers, tl);
            let mut bits = bitrate as f64 / (self.framerate * share);
            if is_key {
                bits *= KEY_FRAME_SIZE_FACTOR;
            }
            let qp = estimate_qp(bits, layer.pixel_count(), self.qp_max);
            let size = ((bits / 8.0) as usize).clamp(MIN_PAYLOAD_BYTES, MAX_PAYLOAD_BYTES);
            let data = synthesize_payload(frame, s as u8, tl, is_key, qp, size);

            let fragmentation = (size > self.max_payload_size)
                .then(|| FragmentationHeader::split(size, self.max_payload_size));

            let layer_sync = tl > 0
                && pattern_index < temporal_pattern(layer.num_temporal_layers).len() as u64;

            picture.layers.push(LayerOutput {
                image: EncodedImage {
                    data,
                    encoded_width: layer.width,
                    encoded_height: layer.height,
                    rtp_timestamp: frame.rtp_timestamp,
                    capture_time_ms: frame.capture_time_ms,
                    frame_type: if is_key {
                        VideoFrameType::Key
                    } else {
                        VideoFrameType::Delta
                    },
                    qp: Some(qp),
                    spatial_index: Some(s as u8),
                },
                info: CodecSpecificInfo {
                    codec_type: self.codec_type,
                    temporal_index: tl,
                    spatial_index: s as u8,
                    end_of_picture: false,
                    layer_sync,
                },
                fragmentation,
            });
        }

        if let Some(last) = picture.layers.last_mut() {
            last.info.end_of_picture = true;
        }

        // a frame whose scheduled layers all have zero bitrate still
        // occupies its slot in the temporal pattern
        self.pattern_position = pattern_index + 1;
        if is_key && picture.is_empty() {
            self.key_pending = true;
        } else if is_key {
            self.key_pending = false;
            self.pictures_since_key = 1;
        } else {
            self.pictures_since_key += 1;
        }
        picture
    }
}

/// Deterministic payload: 4-byte layer header followed by bytes sampled
/// from the input
fn synthesize_payload(
    frame: &VideoFrame,
    spatial: u8,
    temporal: u8,
    is_key: bool,
    qp: i32,
    size: usize,
) -> Bytes {
    let mut data = Vec::with_capacity(size);
    data.extend_from_slice(&[spatial, temporal, u8::from(is_key), qp.clamp(0, 255) as u8]);

    let source = &frame.data;
    let stride = (source.len() / size.max(1)).max(1);
    data.extend((data.len()..size).map(|i| {
        let sample = if source.is_empty() {
            0
        } else {
            source[(i * stride) % source.len()]
        };
        sample ^ (i as u8)
    }));
    data.truncate(size);
    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PixelFormat;

    fn params(codec: VideoCodec) -> InitParams {
        InitParams {
            settings: codec,
            number_of_cores: 1,
            max_payload_size: 1200,
        }
    }

    fn frame(width: u32, height: u32, rtp: u32) -> VideoFrame {
        let size = PixelFormat::I420.frame_size(width, height).unwrap();
        VideoFrame::new(width, height, PixelFormat::I420, rtp, Bytes::from(vec![0x80; size]))
    }

    #[test]
    fn test_temporal_patterns() {
        let two: Vec<u8> = (0..4).map(|i| temporal_index(2, i)).collect();
        assert_eq!(two, vec![0, 1, 0, 1]);
        let three: Vec<u8> = (0..8).map(|i| temporal_index(3, i)).collect();
        assert_eq!(three, vec![0, 2, 1, 2, 0, 2, 1, 2]);
        assert_eq!(temporal_index(1, 17), 0);
    }

    #[test]
    fn test_temporal_shares_sum_to_one() {
        for n in 1..=4u8 {
            let sum: f64 = (0..n).map(|t| temporal_share(n, t)).sum();
            assert!((sum - 1.0).abs() < 1e-9, "n={} sum={}", n, sum);
        }
    }

    #[test]
    fn test_qp_tracks_bits_per_pixel() {
        // 0.1 bpp at the reference point
        assert_eq!(estimate_qp(5760.0, 57_600, 56), 36);
        assert!(estimate_qp(1000.0, 57_600, 56) > 36);
        assert!(estimate_qp(100_000.0, 57_600, 56) < 36);
        assert_eq!(estimate_qp(0.0, 57_600, 56), 56);
        assert_eq!(estimate_qp(1.0, 1_000_000, 40), 40);
    }

    #[test]
    fn test_first_frame_is_key() {
        let mut model = LayerModel::new(&params(VideoCodec::new(CodecType::Vp8, 320, 180)));
        let first = model.encode(&frame(320, 180, 0), None);
        assert!(first.is_key);
        assert_eq!(first.layers.len(), 1);
        assert!(first.layers[0].image.is_key_frame());
        assert!(first.layers[0].info.end_of_picture);

        let second = model.encode(&frame(320, 180, 3000), None);
        assert!(!second.is_key);

        let forced = model.encode(&frame(320, 180, 6000), Some(&[VideoFrameType::Key]));
        assert!(forced.is_key);
    }

    #[test]
    fn test_zero_bitrate_layer_skipped() {
        let codec = VideoCodec::new(CodecType::Vp9, 640, 360).with_spatial_layers(2, 1);
        let mut model = LayerModel::new(&params(codec));

        let mut allocation = VideoBitrateAllocation::new();
        allocation.set_bitrate(0, 0, 100_000);
        allocation.set_bitrate(1, 0, 0);
        model.set_rates(&allocation, 30.0);

        let picture = model.encode(&frame(640, 360, 0), None);
        assert_eq!(picture.layers.len(), 1);
        assert_eq!(picture.layers[0].info.spatial_index, 0);
        assert!(picture.layers[0].info.end_of_picture);
    }

    #[test]
    fn test_zero_bitrate_temporal_layer_keeps_base_layer_flowing() {
        let codec = VideoCodec::new(CodecType::Vp9, 320, 180).with_spatial_layers(1, 2);
        let mut model = LayerModel::new(&params(codec));

        let mut allocation = VideoBitrateAllocation::new();
        allocation.set_bitrate(0, 0, 200_000);
        allocation.set_bitrate(0, 1, 0);
        model.set_rates(&allocation, 30.0);

        let layers: Vec<usize> = (0..10)
            .map(|i| model.encode(&frame(320, 180, i * 3000), None).layers.len())
            .collect();
        assert_eq!(layers, vec![1, 0, 1, 0, 1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_empty_key_frame_stays_pending() {
        let mut model = LayerModel::new(&params(VideoCodec::new(CodecType::Vp8, 320, 180)));
        model.set_rates(&VideoBitrateAllocation::new(), 30.0);
        assert!(model.encode(&frame(320, 180, 0), None).is_empty());

        model.set_rates(&VideoBitrateAllocation::single_layer(100_000), 30.0);
        let picture = model.encode(&frame(320, 180, 3000), None);
        assert!(picture.is_key);
        assert_eq!(picture.layers.len(), 1);
    }

    #[test]
    fn test_payload_size_follows_rate() {
        let mut model = LayerModel::new(&params(VideoCodec::new(CodecType::H264, 640, 360)));
        model.set_rates(&VideoBitrateAllocation::single_layer(240_000), 30.0);

        model.encode(&frame(640, 360, 0), None);
        let delta = model.encode(&frame(640, 360, 3000), None);
        // 240 kbps at 30 fps is 1000 bytes per frame
        assert_eq!(delta.bytes(), 1000);
        assert!(delta.layers[0].fragmentation.is_none());
    }

    #[test]
    fn test_large_payload_fragmented() {
        let mut model = LayerModel::new(&params(VideoCodec::new(CodecType::H264, 640, 360)));
        model.set_rates(&VideoBitrateAllocation::single_layer(2_400_000), 30.0);

        let key = model.encode(&frame(640, 360, 0), None);
        let layer = &key.layers[0];
        let header = layer.fragmentation.as_ref().unwrap();
        assert!(header.len() > 1);
        assert!(header.validate(layer.image.size()).is_ok());
        assert!(header.partitions().all(|(_, len)| len <= 1200));
    }

    #[test]
    fn test_unspecified_framerate_uses_init_max() {
        let mut codec = VideoCodec::new(CodecType::Vp8, 320, 180);
        codec.max_framerate = 24;
        let mut model = LayerModel::new(&params(codec));

        assert_eq!(model.set_rates(&VideoBitrateAllocation::single_layer(100_000), 15.0), 15.0);
        assert_eq!(model.set_rates(&VideoBitrateAllocation::single_layer(100_000), 0.0), 24.0);
        assert_eq!(model.set_rates(&VideoBitrateAllocation::single_layer(100_000), -1.0), 24.0);
    }

    #[test]
    fn test_intra_refresh_forces_key_frames() {
        let mut model = LayerModel::new(&params(VideoCodec::new(CodecType::Vp8, 320, 180)));
        model.set_intra_refresh_period(Some(3));

        let keys: Vec<bool> = (0..7)
            .map(|i| model.encode(&frame(320, 180, i * 3000), None).is_key)
            .collect();
        assert_eq!(keys, vec![true, false, false, true, false, false, true]);
    }

    #[test]
    fn test_empty_frame_type_skips_layer() {
        let codec = VideoCodec::new(CodecType::Vp9, 640, 360).with_spatial_layers(2, 1);
        let mut model = LayerModel::new(&params(codec));
        let picture = model.encode(
            &frame(640, 360, 0),
            Some(&[VideoFrameType::Key, VideoFrameType::Empty]),
        );
        assert_eq!(picture.layers.len(), 1);
        assert!(picture.is_key);
    }

    #[test]
    fn test_frame_types_longer_than_layers_rejected() {
        let types = [VideoFrameType::Delta, VideoFrameType::Delta];
        assert!(validate_frame_types(Some(&types), 1).is_err());
        assert!(validate_frame_types(Some(&types), 2).is_ok());
        assert!(validate_frame_types(None, 1).is_ok());
    }

    #[test]
    fn test_initial_allocation_uses_targets() {
        let codec = VideoCodec::new(CodecType::H264, 640, 360);
        assert_eq!(initial_allocation(&codec).sum_kbps(), 300);

        let layered = VideoCodec::new(CodecType::Vp9, 640, 360).with_spatial_layers(2, 2);
        let allocation = initial_allocation(&layered);
        assert!(allocation.is_spatial_layer_used(0));
        assert!(allocation.is_spatial_layer_used(1));
        assert_eq!(allocation.get_bitrate(1, 0), allocation.get_bitrate(1, 1));
    }
}
