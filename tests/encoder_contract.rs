//! Behavior every backend must show through the `VideoEncoder` trait

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use lamco_encoder_contract::backends::{
    HardwareDevice, HardwareEncoder, HardwareEncoderConfig, PassthroughEncoder, SoftwareEncoder,
    SOFTWARE_IMPLEMENTATION_NAME,
};
use lamco_encoder_contract::callback::{
    encoded_channel, CallbackResult, DropReason, EncodedImageCallback, EncoderEvent,
};
use lamco_encoder_contract::codec::{
    CodecSpecificInfo, CodecType, DataRate, EncodedImage, FragmentationHeader, PixelFormat,
    VideoBitrateAllocation, VideoCodec, VideoFrame, VideoFrameType,
};
use lamco_encoder_contract::encoder::{
    EncoderError, EncoderState, RateControlParameters, ScalingSettings, SoftwareFallbackEncoder,
    VideoEncoder,
};

fn frame(width: u32, height: u32, rtp: u32) -> VideoFrame {
    let size = PixelFormat::I420.frame_size(width, height).unwrap();
    VideoFrame::new(width, height, PixelFormat::I420, rtp, Bytes::from(vec![0x80; size]))
}

fn backends(device: &HardwareDevice) -> Vec<Box<dyn VideoEncoder>> {
    vec![
        Box::new(SoftwareEncoder::default()),
        Box::new(HardwareEncoder::new(HardwareEncoderConfig::default(), device.clone())),
        Box::new(PassthroughEncoder::new()),
    ]
}

/// What a recording callback saw
#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Image { rtp: u32, spatial: u8, end_of_picture: bool },
    Dropped(DropReason),
}

/// Records deliveries; asks for a drop on the deliveries listed in `drop_on`
#[derive(Default)]
struct RecordingCallback {
    seen: Mutex<Vec<Seen>>,
    drop_on: Vec<u32>,
}

impl RecordingCallback {
    fn dropping_after(rtp: u32) -> Self {
        Self {
            drop_on: vec![rtp],
            ..Self::default()
        }
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

impl EncodedImageCallback for RecordingCallback {
    fn on_encoded_image(
        &self,
        image: &EncodedImage,
        codec_specific_info: Option<&CodecSpecificInfo>,
        _fragmentation: Option<&FragmentationHeader>,
    ) -> CallbackResult {
        self.seen.lock().push(Seen::Image {
            rtp: image.rtp_timestamp,
            spatial: image.spatial_index.unwrap_or(0),
            end_of_picture: codec_specific_info.map_or(true, |i| i.end_of_picture),
        });
        CallbackResult::ok(image.rtp_timestamp)
            .with_drop_next_frame(self.drop_on.contains(&image.rtp_timestamp))
    }

    fn on_dropped_frame(&self, reason: DropReason) {
        self.seen.lock().push(Seen::Dropped(reason));
    }
}

#[test]
fn test_every_backend_rejects_calls_outside_initialized_state() {
    let device = HardwareDevice::new(1);
    let codec = VideoCodec::new(CodecType::Vp8, 320, 180);
    let rates =
        RateControlParameters::from_allocation(VideoBitrateAllocation::single_layer(200_000), 30.0);

    for mut encoder in backends(&device) {
        let (callback, _receiver) = encoded_channel(16);
        encoder
            .register_encode_complete_callback(Arc::new(callback))
            .unwrap();

        assert_eq!(encoder.state(), EncoderState::Uninitialized);
        assert_eq!(encoder.encode(&frame(320, 180, 0), None), Err(EncoderError::NotInitialized));
        assert_eq!(encoder.set_rates(&rates), Err(EncoderError::NotInitialized));

        encoder.init_encode(&codec, 2, 1200).unwrap();
        encoder.encode(&frame(320, 180, 3000), None).unwrap();
        encoder.release().unwrap();

        assert_eq!(encoder.state(), EncoderState::Released);
        assert_eq!(encoder.encode(&frame(320, 180, 6000), None), Err(EncoderError::NotInitialized));
        assert_eq!(encoder.set_rates(&rates), Err(EncoderError::NotInitialized));
        // second release is harmless
        encoder.release().unwrap();
    }
    assert_eq!(device.active_sessions(), 0);
}

#[test]
fn test_double_init_rejected() {
    let mut encoder = SoftwareEncoder::default();
    let codec = VideoCodec::new(CodecType::Vp8, 320, 180);
    encoder.init_encode(&codec, 1, 1200).unwrap();
    assert!(matches!(
        encoder.init_encode(&codec, 1, 1200),
        Err(EncoderError::InvalidParameter(_))
    ));
}

#[test]
fn test_invalid_init_parameters() {
    let device = HardwareDevice::new(1);
    for mut encoder in backends(&device) {
        let codec = VideoCodec::new(CodecType::Vp8, 320, 180);
        assert!(matches!(
            encoder.init_encode(&codec, 0, 1200),
            Err(EncoderError::InvalidParameter(_))
        ));
        assert!(matches!(
            encoder.init_encode(&codec, 1, 0),
            Err(EncoderError::InvalidParameter(_))
        ));
        assert!(matches!(
            encoder.init_encode(&VideoCodec::new(CodecType::Vp8, 0, 180), 1, 1200),
            Err(EncoderError::InvalidParameter(_))
        ));
        assert_eq!(encoder.state(), EncoderState::Uninitialized);
    }
}

#[test]
fn test_zero_framerate_keeps_init_maximum() {
    let device = HardwareDevice::new(1);
    let mut codec = VideoCodec::new(CodecType::Vp8, 320, 180);
    codec.max_framerate = 25;
    let rates = RateControlParameters::new(
        VideoBitrateAllocation::single_layer(300_000),
        0.0,
        DataRate::from_kbps(300),
    );

    let mut software = SoftwareEncoder::default();
    software.init_encode(&codec, 1, 1200).unwrap();
    software.set_rates(&rates).unwrap();
    assert_eq!(software.target_framerate(), Some(25.0));

    let mut hardware = HardwareEncoder::new(HardwareEncoderConfig::default(), device);
    hardware.init_encode(&codec, 1, 1200).unwrap();
    hardware.set_rates(&rates).unwrap();
    assert_eq!(hardware.target_framerate(), Some(25.0));

    let mut passthrough = PassthroughEncoder::new();
    passthrough.init_encode(&codec, 1, 1200).unwrap();
    passthrough.set_rates(&rates).unwrap();
    assert_eq!(passthrough.last_rates(), Some((300, 25)));
}

#[test]
fn test_drop_next_frame_skips_exactly_one_frame() {
    let callback = Arc::new(RecordingCallback::dropping_after(3000));
    let mut encoder = SoftwareEncoder::default();
    encoder
        .register_encode_complete_callback(callback.clone())
        .unwrap();
    encoder
        .init_encode(&VideoCodec::new(CodecType::Vp8, 320, 180), 1, 1200)
        .unwrap();

    for rtp in [0, 3000, 6000, 9000] {
        encoder.encode(&frame(320, 180, rtp), None).unwrap();
    }

    let rtps: Vec<Option<u32>> = callback
        .seen()
        .into_iter()
        .map(|seen| match seen {
            Seen::Image { rtp, .. } => Some(rtp),
            Seen::Dropped(reason) => {
                assert_eq!(reason, DropReason::DroppedByMediaOptimizations);
                None
            }
        })
        .collect();
    assert_eq!(rtps, vec![Some(0), Some(3000), None, Some(9000)]);
}

#[test]
fn test_drop_next_frame_on_hardware_worker() {
    let callback = Arc::new(RecordingCallback::dropping_after(0));
    let mut encoder =
        HardwareEncoder::new(HardwareEncoderConfig::default(), HardwareDevice::new(1));
    encoder
        .register_encode_complete_callback(callback.clone())
        .unwrap();
    encoder
        .init_encode(&VideoCodec::new(CodecType::H264, 320, 180), 1, 1200)
        .unwrap();

    for rtp in [0, 3000, 6000] {
        encoder.encode(&frame(320, 180, rtp), None).unwrap();
    }
    encoder.release().unwrap();

    let seen = callback.seen();
    assert_eq!(
        seen.iter()
            .filter(|s| **s == Seen::Dropped(DropReason::DroppedByMediaOptimizations))
            .count(),
        1
    );
    assert!(!seen.iter().any(|s| matches!(s, Seen::Image { rtp: 3000, .. })));
    assert!(seen.iter().any(|s| matches!(s, Seen::Image { rtp: 6000, .. })));
}

#[test]
fn test_hardware_delivery_keeps_layer_order() {
    let (callback, receiver) = encoded_channel(1024);
    let mut encoder =
        HardwareEncoder::new(HardwareEncoderConfig::default(), HardwareDevice::new(1));
    encoder
        .register_encode_complete_callback(Arc::new(callback))
        .unwrap();
    let codec = VideoCodec::new(CodecType::Vp9, 640, 360).with_spatial_layers(2, 2);
    encoder.init_encode(&codec, 4, 1200).unwrap();

    for i in 0..90u32 {
        encoder.encode(&frame(640, 360, i * 3000), None).unwrap();
    }
    // release drains everything already queued
    encoder.release().unwrap();

    let events = receiver.drain();
    assert!(!events.is_empty());
    assert_eq!(receiver.order_violations(), 0);

    let mut last_per_layer = std::collections::HashMap::new();
    let mut unique = HashSet::new();
    for event in &events {
        if let EncoderEvent::Encoded { image, .. } = event {
            let layer = event.layer().unwrap();
            if let Some(previous) = last_per_layer.insert(layer, image.rtp_timestamp) {
                assert!(image.rtp_timestamp > previous, "layer {:?} reordered", layer);
            }
            assert!(unique.insert((layer, image.rtp_timestamp)), "duplicate delivery");
        }
    }
}

#[test]
fn test_zero_bitrate_layer_not_encoded() {
    let callback = Arc::new(RecordingCallback::default());
    let mut encoder = SoftwareEncoder::default();
    encoder
        .register_encode_complete_callback(callback.clone())
        .unwrap();

    let codec = VideoCodec::new(CodecType::Vp9, 320, 180).with_spatial_layers(2, 1);
    encoder.init_encode(&codec, 4, 1200).unwrap();

    let mut allocation = VideoBitrateAllocation::new();
    allocation.set_bitrate(0, 0, 100_000);
    allocation.set_bitrate(1, 0, 0);
    encoder
        .set_rates(&RateControlParameters::new(allocation, 30.0, DataRate::from_kbps(120)))
        .unwrap();

    encoder.encode(&frame(320, 180, 90_000), None).unwrap();

    assert_eq!(
        callback.seen(),
        vec![Seen::Image {
            rtp: 90_000,
            spatial: 0,
            end_of_picture: true
        }]
    );
}

#[test]
fn test_zero_bitrate_temporal_layer_keeps_base_layer_flowing() {
    let device = HardwareDevice::new(1);
    let codec = VideoCodec::new(CodecType::Vp9, 320, 180).with_spatial_layers(1, 2);
    let mut allocation = VideoBitrateAllocation::new();
    allocation.set_bitrate(0, 0, 200_000);
    allocation.set_bitrate(0, 1, 0);
    let rates = RateControlParameters::from_allocation(allocation, 30.0);

    let encoders: Vec<Box<dyn VideoEncoder>> = vec![
        Box::new(SoftwareEncoder::default()),
        Box::new(HardwareEncoder::new(HardwareEncoderConfig::default(), device)),
    ];
    for mut encoder in encoders {
        let callback = Arc::new(RecordingCallback::default());
        encoder
            .register_encode_complete_callback(callback.clone())
            .unwrap();
        encoder.init_encode(&codec, 1, 1200).unwrap();
        encoder.set_rates(&rates).unwrap();

        for i in 0..10 {
            encoder.encode(&frame(320, 180, i * 3000), None).unwrap();
        }
        encoder.release().unwrap();

        let delivered: Vec<u32> = callback
            .seen()
            .iter()
            .filter_map(|seen| match seen {
                Seen::Image { rtp, .. } => Some(*rtp),
                Seen::Dropped(_) => None,
            })
            .collect();
        // T1 frames are skipped, every T0 frame still goes out
        assert_eq!(delivered, vec![0, 6000, 12_000, 18_000, 24_000]);
    }
}

#[test]
fn test_too_many_frame_types_rejected() {
    let mut encoder = SoftwareEncoder::default();
    encoder
        .register_encode_complete_callback(Arc::new(RecordingCallback::default()))
        .unwrap();
    encoder
        .init_encode(&VideoCodec::new(CodecType::Vp8, 320, 180), 1, 1200)
        .unwrap();

    let types = [VideoFrameType::Key, VideoFrameType::Delta];
    assert!(matches!(
        encoder.encode(&frame(320, 180, 0), Some(&types)),
        Err(EncoderError::InvalidParameter(_))
    ));
}

#[test]
fn test_fallback_on_session_limit_and_back() {
    let device = HardwareDevice::new(1);
    let codec = VideoCodec::new(CodecType::H264, 640, 360);

    let mut holder = HardwareEncoder::new(HardwareEncoderConfig::default(), device.clone());
    holder.init_encode(&codec, 1, 1200).unwrap();

    let mut encoder = SoftwareFallbackEncoder::new(
        Box::new(HardwareEncoder::new(HardwareEncoderConfig::default(), device.clone())),
        Box::new(SoftwareEncoder::new(ScalingSettings::new(24, 37))),
    );
    let (callback, receiver) = encoded_channel(64);
    encoder
        .register_encode_complete_callback(Arc::new(callback))
        .unwrap();

    encoder.init_encode(&codec, 1, 1200).unwrap();
    assert!(encoder.is_fallback_active());
    let info = encoder.encoder_info();
    assert!(!info.is_hardware_accelerated);
    assert!(info.implementation_name.starts_with(SOFTWARE_IMPLEMENTATION_NAME));
    assert!(info.scaling_settings.is_enabled());

    // the fallback encoder got the callback and encodes synchronously
    encoder.encode(&frame(640, 360, 0), None).unwrap();
    assert_eq!(receiver.drain().len(), 1);

    encoder.release().unwrap();
    holder.release().unwrap();

    encoder.init_encode(&codec, 1, 1200).unwrap();
    assert!(!encoder.is_fallback_active());
    let info = encoder.encoder_info();
    assert!(info.is_hardware_accelerated);
    assert!(info.has_trusted_rate_controller);
    assert_eq!(encoder.fallback_count(), 1);
}

#[test]
fn test_fallback_on_resolution_change_keeps_rates() {
    let device = HardwareDevice::new(1);
    let mut encoder = SoftwareFallbackEncoder::new(
        Box::new(HardwareEncoder::new(HardwareEncoderConfig::default(), device.clone())),
        Box::new(SoftwareEncoder::default()),
    );
    let (callback, receiver) = encoded_channel(64);
    encoder
        .register_encode_complete_callback(Arc::new(callback))
        .unwrap();

    // the software fallback takes any frame size, the hardware session does not
    encoder
        .init_encode(&VideoCodec::new(CodecType::Vp8, 320, 180), 1, 1200)
        .unwrap();
    encoder
        .set_rates(&RateControlParameters::from_allocation(
            VideoBitrateAllocation::single_layer(150_000),
            15.0,
        ))
        .unwrap();

    encoder.encode(&frame(640, 360, 0), None).unwrap();
    assert!(encoder.is_fallback_active());
    assert_eq!(device.active_sessions(), 0);

    let delivered = receiver.recv_timeout(Duration::from_secs(1));
    assert!(matches!(delivered, Some(EncoderEvent::Encoded { .. })));
}

#[test]
fn test_non_resource_errors_do_not_fall_back() {
    let device = HardwareDevice::new(1);
    let mut encoder = SoftwareFallbackEncoder::new(
        Box::new(HardwareEncoder::new(HardwareEncoderConfig::default(), device)),
        Box::new(SoftwareEncoder::default()),
    );
    let codec = VideoCodec::new(CodecType::Vp8, 320, 180);
    assert!(matches!(
        encoder.init_encode(&codec, 0, 1200),
        Err(EncoderError::InvalidParameter(_))
    ));
    assert!(!encoder.is_fallback_active());
    assert_eq!(encoder.fallback_count(), 0);
}

#[test]
fn test_release_then_init_restores_capabilities() {
    let device = HardwareDevice::new(2);
    for mut encoder in backends(&device) {
        let codec = VideoCodec::new(CodecType::Vp8, 320, 180);
        encoder.init_encode(&codec, 1, 1200).unwrap();
        let before = encoder.encoder_info();
        encoder.release().unwrap();
        encoder.init_encode(&codec, 1, 1200).unwrap();
        assert_eq!(encoder.encoder_info(), before);
        encoder.release().unwrap();
    }
}
