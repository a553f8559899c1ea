//! Message-passing implementation of `EncodedImageCallback`
//!
//! Backends may call back from any thread. Rather than running pipeline
//! code inside that callback, `ChannelCallback` copies each result into a
//! bounded crossbeam channel; the pipeline drains it from its own thread
//! through `EncodedFrameReceiver`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::{CallbackResult, DropReason, EncodedImageCallback, LayerOrderMonitor};
use crate::codec::{CodecSpecificInfo, EncodedImage, FragmentationHeader};

/// One result delivered by an encoder backend
#[derive(Debug, Clone)]
pub enum EncoderEvent {
    Encoded {
        image: EncodedImage,
        codec_specific_info: Option<CodecSpecificInfo>,
        fragmentation: Option<FragmentationHeader>,
    },
    Dropped(DropReason),
}

impl EncoderEvent {
    /// (spatial, temporal) layer of an encoded event
    pub fn layer(&self) -> Option<(u8, u8)> {
        match self {
            EncoderEvent::Encoded {
                image,
                codec_specific_info,
                ..
            } => Some(layer_of(image, codec_specific_info.as_ref())),
            EncoderEvent::Dropped(_) => None,
        }
    }
}

fn layer_of(image: &EncodedImage, info: Option<&CodecSpecificInfo>) -> (u8, u8) {
    let spatial = info
        .map(|i| i.spatial_index)
        .or(image.spatial_index)
        .unwrap_or(0);
    let temporal = info.map(|i| i.temporal_index).unwrap_or(0);
    (spatial, temporal)
}

#[derive(Debug, Default)]
struct Shared {
    drop_next_frame: AtomicBool,
    order: Mutex<LayerOrderMonitor>,
    delivered: AtomicU64,
    send_failures: AtomicU64,
}

/// Create a bounded result channel
///
/// `capacity` is the number of undrained events tolerated before new
/// images are reported back to the backend as `SendFailed`.
pub fn encoded_channel(capacity: usize) -> (ChannelCallback, EncodedFrameReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let shared = Arc::new(Shared::default());

    (
        ChannelCallback {
            tx,
            shared: Arc::clone(&shared),
        },
        EncodedFrameReceiver { rx, shared },
    )
}

/// Sending half, registered with the encoder
#[derive(Debug)]
pub struct ChannelCallback {
    tx: Sender<EncoderEvent>,
    shared: Arc<Shared>,
}

impl EncodedImageCallback for ChannelCallback {
    fn on_encoded_image(
        &self,
        image: &EncodedImage,
        codec_specific_info: Option<&CodecSpecificInfo>,
        fragmentation: Option<&FragmentationHeader>,
    ) -> CallbackResult {
        let (spatial, temporal) = layer_of(image, codec_specific_info);
        if !self
            .shared
            .order
            .lock()
            .observe(spatial, temporal, image.rtp_timestamp)
        {
            warn!(
                "Out-of-order delivery on layer S{}T{}: rtp_timestamp={}",
                spatial, temporal, image.rtp_timestamp
            );
        }

        let event = EncoderEvent::Encoded {
            image: image.clone(),
            codec_specific_info: codec_specific_info.cloned(),
            fragmentation: fragmentation.cloned(),
        };

        match self.tx.try_send(event) {
            Ok(()) => {
                self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                let drop_next = self.shared.drop_next_frame.swap(false, Ordering::AcqRel);
                trace!(
                    "Delivered S{}T{} rtp_timestamp={} size={} drop_next={}",
                    spatial,
                    temporal,
                    image.rtp_timestamp,
                    image.size(),
                    drop_next
                );
                CallbackResult::ok(image.rtp_timestamp).with_drop_next_frame(drop_next)
            }
            Err(TrySendError::Full(_)) => {
                self.shared.send_failures.fetch_add(1, Ordering::Relaxed);
                debug!("Result channel full, rtp_timestamp={} not delivered", image.rtp_timestamp);
                CallbackResult::send_failed()
            }
            Err(TrySendError::Disconnected(_)) => {
                self.shared.send_failures.fetch_add(1, Ordering::Relaxed);
                debug!("Result receiver gone, rtp_timestamp={} not delivered", image.rtp_timestamp);
                CallbackResult::send_failed()
            }
        }
    }

    fn on_dropped_frame(&self, reason: DropReason) {
        if self.tx.try_send(EncoderEvent::Dropped(reason)).is_err() {
            debug!("Drop notification ({}) not delivered", reason);
        }
    }
}

/// Receiving half, drained by the pipeline
#[derive(Debug)]
pub struct EncodedFrameReceiver {
    rx: Receiver<EncoderEvent>,
    shared: Arc<Shared>,
}

impl EncodedFrameReceiver {
    /// Block until the next event; `None` once every sender is gone
    pub fn recv(&self) -> Option<EncoderEvent> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<EncoderEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout`; `None` on timeout or disconnect
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EncoderEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything currently queued, without blocking
    pub fn drain(&self) -> Vec<EncoderEvent> {
        self.rx.try_iter().collect()
    }

    /// Ask the backend to skip its next frame. Piggybacks on the result of
    /// the next successfully delivered image.
    pub fn request_drop_next_frame(&self) {
        self.shared.drop_next_frame.store(true, Ordering::Release);
    }

    pub fn drop_pending(&self) -> bool {
        self.shared.drop_next_frame.load(Ordering::Acquire)
    }

    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.shared.send_failures.load(Ordering::Relaxed)
    }

    pub fn order_violations(&self) -> u64 {
        self.shared.order.lock().violations()
    }

    /// Forget per-layer ordering state after the encoder was re-initialized
    pub fn reset_ordering(&self) {
        self.shared.order.lock().reset();
    }
}
