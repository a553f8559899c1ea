//! Hardware-accelerated backend
//!
//! Models a fixed-function encoder block: a limited number of encode
//! sessions per device, a bounded submit queue and a dedicated worker
//! thread that completes frames asynchronously.
//!
//! # Threading
//!
//! ```text
//!  encode() ──► bounded queue ──► worker thread ──► EncodedImageCallback
//!  set_rates() ───► Mutex (latest wins) ─┘
//!  on_rtt/loss ───► atomics ─────────────┘
//! ```
//!
//! Control calls never wait for the worker. `release()` closes the queue,
//! lets the worker finish every frame already submitted and joins it, so
//! no callback fires afterwards.
//!
//! # Rate control
//!
//! The encoder reports `has_trusted_rate_controller`: it keeps its own
//! leaky bucket at the target bitrate (widened by the bandwidth headroom)
//! and skips frames with `DroppedByEncoder` when the bucket overflows.
//! Packet loss and RTT shorten the intra-refresh period.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::callback::{DropReason, EncodedImageCallback};
use crate::codec::{VideoCodec, VideoFrame, VideoFrameType};
use crate::encoder::{
    EncoderError, EncoderInfo, EncoderResult, EncoderState, FpsAllocation, HardwareBackendError,
    InitParams, Lifecycle, RateControlParameters, RateProtocol, ScalingSettings, VideoEncoder,
};
use crate::quality::LeakyBucket;

use super::model::{fps_allocation_for, validate_frame_types, LayerModel};
use super::stats::{EncodeTimer, EncoderStats};

pub const HARDWARE_IMPLEMENTATION_NAME: &str = "hardware-accelerated";

/// Encode sessions available on a device unless configured otherwise
pub const DEFAULT_MAX_SESSIONS: usize = 2;

/// Loss below this does not affect intra refresh
const LOSS_REFRESH_THRESHOLD: f32 = 0.02;

/// Above this RTT, retransmission is too slow to repair losses
const HIGH_RTT_MS: i64 = 300;

const MAX_INTRA_REFRESH_FRAMES: u32 = 300;

/// Tunables of the hardware backend
#[derive(Debug, Clone)]
pub struct HardwareEncoderConfig {
    /// Frames that may wait for the worker
    pub queue_depth: usize,
    /// How long `encode()` waits for a queue slot
    pub submit_timeout: Duration,
    /// Largest frame the encoder block accepts
    pub max_pixels: u64,
    pub scaling: ScalingSettings,
    /// Shortest intra-refresh period under heavy loss
    pub min_intra_refresh_frames: u32,
    /// Data the rate controller may buffer before skipping frames
    pub rate_window: Duration,
}

impl Default for HardwareEncoderConfig {
    fn default() -> Self {
        Self {
            queue_depth: 8,
            submit_timeout: Duration::from_millis(100),
            max_pixels: 4096 * 2304,
            scaling: ScalingSettings::new(24, 37),
            min_intra_refresh_frames: 30,
            rate_window: Duration::from_millis(500),
        }
    }
}

/// Intra-refresh period for the given network conditions
///
/// `None` while loss is negligible. Otherwise roughly ten times the mean
/// distance between losses, halved when RTT is too high for
/// retransmissions to help.
pub fn intra_refresh_period(packet_loss_rate: f32, rtt_ms: i64, min_frames: u32) -> Option<u32> {
    if packet_loss_rate.is_nan() || packet_loss_rate < LOSS_REFRESH_THRESHOLD {
        return None;
    }
    let mut period = (10.0 / packet_loss_rate as f64).round() as u32;
    if rtt_ms > HIGH_RTT_MS {
        period /= 2;
    }
    Some(period.clamp(min_frames.max(1), MAX_INTRA_REFRESH_FRAMES.max(min_frames)))
}

#[derive(Debug)]
struct DeviceInner {
    max_sessions: usize,
    active: AtomicUsize,
}

/// Encode session pool of one hardware device
#[derive(Debug, Clone)]
pub struct HardwareDevice {
    inner: Arc<DeviceInner>,
}

impl HardwareDevice {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                max_sessions,
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// Process-wide device; the first caller decides the session limit
    pub fn system(max_sessions: usize) -> Self {
        static SYSTEM: OnceLock<HardwareDevice> = OnceLock::new();
        SYSTEM
            .get_or_init(|| {
                debug!("System hardware device: {} sessions", max_sessions);
                HardwareDevice::new(max_sessions)
            })
            .clone()
    }

    pub fn max_sessions(&self) -> usize {
        self.inner.max_sessions
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Whether a session could be opened right now
    pub fn is_available(&self) -> bool {
        self.active_sessions() < self.max_sessions()
    }

    fn acquire(&self) -> Result<SessionGuard, HardwareBackendError> {
        let max = self.inner.max_sessions;
        self.inner
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < max).then_some(active + 1)
            })
            .map_err(|active| HardwareBackendError::SessionLimitReached { active, max })?;

        Ok(SessionGuard {
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Held for the lifetime of one initialized encoder
#[derive(Debug)]
struct SessionGuard {
    inner: Arc<DeviceInner>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// State shared between the caller and the worker thread
struct WorkerShared {
    callback: Mutex<Option<Arc<dyn EncodedImageCallback>>>,
    pending_rates: Mutex<Option<RateControlParameters>>,
    /// f32 bits
    packet_loss_rate: AtomicU32,
    rtt_ms: AtomicI64,
    drop_next_frame: AtomicBool,
    stats: Mutex<EncoderStats>,
}

impl WorkerShared {
    fn new() -> Self {
        Self {
            callback: Mutex::new(None),
            pending_rates: Mutex::new(None),
            packet_loss_rate: AtomicU32::new(0f32.to_bits()),
            rtt_ms: AtomicI64::new(0),
            drop_next_frame: AtomicBool::new(false),
            stats: Mutex::new(EncoderStats::new("hardware", 0)),
        }
    }

    fn packet_loss_rate(&self) -> f32 {
        f32::from_bits(self.packet_loss_rate.load(Ordering::Relaxed))
    }
}

struct EncodeJob {
    frame: VideoFrame,
    frame_types: Option<Vec<VideoFrameType>>,
}

struct Worker {
    tx: Sender<EncodeJob>,
    handle: JoinHandle<()>,
    _session: SessionGuard,
}

impl Worker {
    /// Close the queue and wait until every queued frame was processed
    fn shutdown(self) {
        let Worker {
            tx,
            handle,
            _session,
        } = self;
        drop(tx);
        if handle.join().is_err() {
            error!("Hardware encoder worker panicked");
        }
    }
}

/// Worker-owned encoder state
struct WorkerState {
    model: LayerModel,
    bucket: LeakyBucket,
    min_intra_refresh_frames: u32,
}

impl WorkerState {
    fn apply_pending_rates(&mut self, shared: &WorkerShared) {
        let Some(params) = shared.pending_rates.lock().take() else {
            return;
        };
        let framerate = self.model.set_rates(&params.bitrate, params.framerate_fps);
        let sum = params.bitrate.sum_bps();
        self.bucket.set_rate(sum);
        if sum > 0 {
            self.bucket
                .set_capacity_scale(params.bandwidth_allocation.bps() as f64 / sum as f64);
        }
        trace!("Worker applied rates: {} at {} fps", params.bitrate, framerate);
    }

    fn apply_network_state(&mut self, shared: &WorkerShared) {
        let period = intra_refresh_period(
            shared.packet_loss_rate(),
            shared.rtt_ms.load(Ordering::Relaxed),
            self.min_intra_refresh_frames,
        );
        if period != self.model.intra_refresh_period() {
            debug!("Intra-refresh period: {:?} frames", period);
            self.model.set_intra_refresh_period(period);
        }
    }

    fn process(&mut self, job: EncodeJob, shared: &WorkerShared) {
        self.apply_pending_rates(shared);
        self.apply_network_state(shared);

        let Some(callback) = shared.callback.lock().clone() else {
            warn!(
                "No callback registered, discarding frame rtp_timestamp={}",
                job.frame.rtp_timestamp
            );
            return;
        };

        self.bucket.leak(self.model.frame_interval());

        if shared.drop_next_frame.swap(false, Ordering::AcqRel) {
            shared
                .stats
                .lock()
                .record_drop(DropReason::DroppedByMediaOptimizations);
            debug!("Dropping frame rtp_timestamp={} on request", job.frame.rtp_timestamp);
            callback.on_dropped_frame(DropReason::DroppedByMediaOptimizations);
            return;
        }

        let frame_types = job.frame_types.as_deref();
        if self.bucket.is_overflowing() && !self.model.next_is_key(frame_types) {
            shared.stats.lock().record_drop(DropReason::DroppedByEncoder);
            debug!(
                "Rate controller skipping rtp_timestamp={} ({:.0}/{:.0} bytes buffered)",
                job.frame.rtp_timestamp,
                self.bucket.level_bytes(),
                self.bucket.capacity_bytes()
            );
            callback.on_dropped_frame(DropReason::DroppedByEncoder);
            return;
        }

        let timer = EncodeTimer::start();
        let picture = self.model.encode(&job.frame, frame_types);
        if picture.is_empty() {
            trace!("Frame rtp_timestamp={} produced no layers", job.frame.rtp_timestamp);
            return;
        }
        self.bucket.fill(picture.bytes());
        shared.stats.lock().record_frame(
            timer.elapsed_ms(),
            picture.layers.len(),
            picture.bytes(),
            picture.is_key,
        );

        for layer in &picture.layers {
            let result = callback.on_encoded_image(
                &layer.image,
                Some(&layer.info),
                layer.fragmentation.as_ref(),
            );
            if !result.is_ok() {
                shared.stats.lock().record_send_failure();
                warn!(
                    "Callback failed to accept S{}T{} rtp_timestamp={}, continuing",
                    layer.info.spatial_index, layer.info.temporal_index, layer.image.rtp_timestamp
                );
            }
            if result.drop_next_frame {
                shared.drop_next_frame.store(true, Ordering::Release);
            }
        }
    }
}

fn run_worker(rx: Receiver<EncodeJob>, mut state: WorkerState, shared: Arc<WorkerShared>) {
    debug!("Hardware encoder worker started");
    for job in rx.iter() {
        state.process(job, &shared);
    }
    debug!("Hardware encoder worker drained, exiting");
}

/// Asynchronous hardware-accelerated encoder
pub struct HardwareEncoder {
    config: HardwareEncoderConfig,
    device: HardwareDevice,
    lifecycle: Lifecycle,
    shared: Arc<WorkerShared>,
    worker: Option<Worker>,
    fps_allocation: FpsAllocation,
    target_framerate: Option<f64>,
}

impl HardwareEncoder {
    pub fn new(config: HardwareEncoderConfig, device: HardwareDevice) -> Self {
        Self {
            config,
            device,
            lifecycle: Lifecycle::new("hardware"),
            shared: Arc::new(WorkerShared::new()),
            worker: None,
            fps_allocation: FpsAllocation::default(),
            target_framerate: None,
        }
    }

    pub fn device(&self) -> &HardwareDevice {
        &self.device
    }

    pub fn stats(&self) -> EncoderStats {
        self.shared.stats.lock().clone()
    }

    /// Framerate requested by the last `set_rates()` (or the init maximum)
    pub fn target_framerate(&self) -> Option<f64> {
        self.target_framerate
    }

    /// Frames submitted but not yet picked up by the worker
    pub fn queued_frames(&self) -> usize {
        self.worker.as_ref().map_or(0, |w| w.tx.len())
    }

    fn check_resolution(&self, settings: &VideoCodec) -> Result<(), HardwareBackendError> {
        let pixels = settings.width as u64 * settings.height as u64;
        if pixels > self.config.max_pixels {
            return Err(HardwareBackendError::UnsupportedResolution {
                width: settings.width,
                height: settings.height,
                max_pixels: self.config.max_pixels,
            });
        }
        Ok(())
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl VideoEncoder for HardwareEncoder {
    fn init_encode(
        &mut self,
        settings: &VideoCodec,
        number_of_cores: u32,
        max_payload_size: usize,
    ) -> EncoderResult<()> {
        self.lifecycle
            .check_init(settings, number_of_cores, max_payload_size)?;
        self.check_resolution(settings)?;
        let session = self.device.acquire()?;

        let params = InitParams {
            settings: settings.clone(),
            number_of_cores,
            max_payload_size,
        };
        let model = LayerModel::new(&params);
        let bucket = LeakyBucket::new(model.allocation().sum_bps(), self.config.rate_window);

        *self.shared.pending_rates.lock() = None;
        self.shared.drop_next_frame.store(false, Ordering::Release);
        *self.shared.stats.lock() = EncoderStats::new("hardware", model.allocation().sum_kbps());

        let state = WorkerState {
            model,
            bucket,
            min_intra_refresh_frames: self.config.min_intra_refresh_frames,
        };
        let (tx, rx) = bounded(self.config.queue_depth.max(1));
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("hw-encoder".to_string())
            .spawn(move || run_worker(rx, state, shared))
            .map_err(HardwareBackendError::SpawnFailed)?;

        self.worker = Some(Worker {
            tx,
            handle,
            _session: session,
        });
        self.fps_allocation = fps_allocation_for(settings);
        self.target_framerate = Some(params.max_framerate());
        self.lifecycle
            .mark_initialized(settings.clone(), number_of_cores, max_payload_size);

        info!(
            "Hardware encoder initialized: {} {}x{}, session {}/{}",
            settings.codec_type,
            settings.width,
            settings.height,
            self.device.active_sessions(),
            self.device.max_sessions()
        );
        Ok(())
    }

    fn register_encode_complete_callback(
        &mut self,
        callback: Arc<dyn EncodedImageCallback>,
    ) -> EncoderResult<()> {
        *self.shared.callback.lock() = Some(callback);
        Ok(())
    }

    fn release(&mut self) -> EncoderResult<()> {
        if !self.lifecycle.mark_released() {
            return Ok(());
        }
        self.stop_worker();
        self.target_framerate = None;
        info!("Hardware encoder released: {}", self.shared.stats.lock().summary());
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        frame_types: Option<&[VideoFrameType]>,
    ) -> EncoderResult<()> {
        let params = self.lifecycle.params()?;
        if self.shared.callback.lock().is_none() {
            return Err(EncoderError::NotInitialized);
        }
        frame.validate()?;
        validate_frame_types(frame_types, params.settings.layers().len())?;

        if frame.width != params.settings.width || frame.height != params.settings.height {
            return Err(EncoderError::InsufficientResources(format!(
                "hardware session configured for {}x{} cannot take {}x{} without reinitialization",
                params.settings.width, params.settings.height, frame.width, frame.height
            )));
        }

        let worker = self.worker.as_ref().ok_or(HardwareBackendError::WorkerGone)?;
        let job = EncodeJob {
            frame: frame.clone(),
            frame_types: frame_types.map(<[VideoFrameType]>::to_vec),
        };

        match worker.tx.send_timeout(job, self.config.submit_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                let timeout_ms = self.config.submit_timeout.as_millis() as u64;
                warn!(
                    "Hardware queue full for {}ms, rtp_timestamp={} rejected",
                    timeout_ms, frame.rtp_timestamp
                );
                Err(HardwareBackendError::QueueFull { timeout_ms }.into())
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(HardwareBackendError::WorkerGone.into()),
        }
    }

    fn rate_protocol(&self) -> RateProtocol {
        RateProtocol::Structured
    }

    fn set_rates(&mut self, parameters: &RateControlParameters) -> EncoderResult<()> {
        let params = self.lifecycle.params()?;
        let effective = parameters.effective_framerate(params.max_framerate());

        *self.shared.pending_rates.lock() = Some(parameters.clone());
        self.shared
            .stats
            .lock()
            .set_target_bitrate_kbps(parameters.bitrate.sum_kbps());
        self.target_framerate = Some(effective);

        debug!(
            "Hardware rates: {} kbps at {} fps, headroom {}",
            parameters.bitrate.sum_kbps(),
            effective,
            parameters.headroom()
        );
        Ok(())
    }

    fn on_packet_loss_rate_update(&mut self, packet_loss_rate: f32) {
        let rate = if packet_loss_rate.is_nan() {
            0.0
        } else {
            packet_loss_rate.clamp(0.0, 1.0)
        };
        self.shared
            .packet_loss_rate
            .store(rate.to_bits(), Ordering::Relaxed);
    }

    fn on_rtt_update(&mut self, rtt_ms: i64) {
        self.shared.rtt_ms.store(rtt_ms.max(0), Ordering::Relaxed);
    }

    fn encoder_info(&self) -> EncoderInfo {
        EncoderInfo {
            scaling_settings: self.config.scaling,
            supports_native_handle: true,
            implementation_name: HARDWARE_IMPLEMENTATION_NAME.to_string(),
            has_trusted_rate_controller: true,
            is_hardware_accelerated: true,
            has_internal_source: false,
            fps_allocation: self.fps_allocation.clone(),
        }
    }

    fn state(&self) -> EncoderState {
        self.lifecycle.state()
    }
}

impl Drop for HardwareEncoder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            debug!("Hardware encoder dropped while initialized, draining worker");
            self.stop_worker();
        }
    }
}
