//! lamco-encoder-probe
//!
//! Drives the configured encoder backend with synthetic frames, a
//! bandwidth ramp and loss/RTT feedback, then reports what the pipeline
//! observed.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lamco_encoder_contract::backends::{
    create_encoder, probe_backends, BackendProbe, EncoderStats, HardwareDevice,
};
use lamco_encoder_contract::codec::{
    DataRate, PixelFormat, VideoBitrateAllocation, VideoCodec, VideoFrame, VideoFrameType,
};
use lamco_encoder_contract::config::{Config, LoggingConfig};
use lamco_encoder_contract::encoder::{EncoderInfo, RateControlParameters};
use lamco_encoder_contract::pipeline::EncoderSession;
use lamco_encoder_contract::quality::ScaleDecision;

/// Command-line arguments for lamco-encoder-probe
#[derive(Parser, Debug)]
#[command(name = "lamco-encoder-probe")]
#[command(
    version,
    about = "Exercise a video encoder backend with synthetic input",
    long_about = None
)]
pub struct Args {
    /// Configuration file path (defaults are used when absent)
    #[arg(short, long, env = "LAMCO_ENCODER_CONFIG")]
    pub config: Option<String>,

    /// Encoder backend (auto|software|hardware|passthrough)
    #[arg(short, long, env = "LAMCO_ENCODER_BACKEND")]
    pub backend: Option<String>,

    /// Codec (vp8|vp9|h264|generic)
    #[arg(long)]
    pub codec: Option<String>,

    /// Number of frames to submit
    #[arg(short, long, default_value = "300")]
    pub frames: u32,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact), overrides the config file
    #[arg(long)]
    pub log_format: Option<String>,

    /// Write logs to file (in addition to stderr)
    #[arg(long)]
    pub log_file: Option<String>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ProbeReport<'a> {
    backends: BackendProbe,
    capabilities: Option<&'a EncoderInfo>,
    capability_versions: u64,
    frame_dropper_requests: u64,
    stats: &'a EncoderStats,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logging comes first so config problems are reported through it
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::default_config(),
    };
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(&args, &logging)?;

    info!("════════════════════════════════════════════════════════");
    info!("  lamco-encoder-probe v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    let config = loaded.or_else(|e| {
        warn!("Failed to load config: {:#}, using defaults", e);
        Config::default_config()
    })?;
    let config = config.with_overrides(args.backend.clone(), args.codec.clone());
    config.validate().context("Invalid configuration after CLI overrides")?;
    debug!("Config: {:?}", config);

    let device = HardwareDevice::system(config.hardware.max_sessions);
    let backends = probe_backends(&device);

    let settings = config.to_codec_settings()?;
    let encoder = create_encoder(&config)?;
    let mut session = EncoderSession::new(encoder, &config.pipeline)?;
    session
        .start(&settings, config.number_of_cores(), config.encoder.max_payload_size)
        .context("Encoder initialization failed")?;

    run(&mut session, &settings, args.frames)?;

    session.stop()?;
    let report = ProbeReport {
        backends,
        capabilities: session.capabilities().current(),
        capability_versions: session.capabilities().version(),
        frame_dropper_requests: session.frame_dropper().drop_requests(),
        stats: session.stats(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.stats.summary());
        if let Some(info) = report.capabilities {
            println!(
                "implementation: {} (hardware={}, trusted_rc={}, capability versions={})",
                info.implementation_name,
                info.is_hardware_accelerated,
                info.has_trusted_rate_controller,
                report.capability_versions
            );
        }
    }
    Ok(())
}

/// Submit `frames` synthetic frames at the configured framerate
///
/// Bandwidth ramps from the min to the max bitrate over the run and back
/// down for the last quarter; packet loss rises in the middle of the run.
fn run(session: &mut EncoderSession, settings: &VideoCodec, frames: u32) -> Result<()> {
    let size = PixelFormat::I420
        .frame_size(settings.width, settings.height)
        .context("Frame size overflows")?;
    let framerate = settings.max_framerate.max(1);
    let rtp_step = 90_000 / framerate;
    let mut last_decision = None;

    for i in 0..frames {
        if i % framerate == 0 {
            let kbps = bandwidth_ramp(settings, i, frames);
            let allocation = allocate(settings, kbps);
            let parameters = RateControlParameters::new(
                allocation,
                framerate as f64,
                DataRate::from_kbps(kbps as u64 * 5 / 4),
            );
            info!("Target bitrate {} kbps", kbps);
            session.set_rates(&parameters)?;

            let progress = i as f32 / frames.max(1) as f32;
            let loss = if (0.4..0.6).contains(&progress) { 0.05 } else { 0.0 };
            session.on_network_feedback(loss, 80);
        }

        let luma = (i % 256) as u8;
        let frame = VideoFrame::new(
            settings.width,
            settings.height,
            PixelFormat::I420,
            i.wrapping_mul(rtp_step),
            Bytes::from(vec![luma; size]),
        )
        .with_capture_time(i as i64 * 1000 / framerate as i64);
        let frame_types = (i == 0).then_some([VideoFrameType::Key]);
        if let Err(e) = session.encode(&frame, frame_types.as_ref().map(|t| t.as_slice())) {
            warn!("Frame {} not encoded: {}", i, e);
        }

        session.poll_timeout(Duration::from_millis(5));
        session.poll();
        let decision = session.last_scale_decision();
        if decision != last_decision && decision != Some(ScaleDecision::Hold) {
            if let Some(decision) = decision {
                info!("Quality scaler recommends {} at frame {}", decision, i);
            }
        }
        last_decision = decision;
    }
    Ok(())
}

fn bandwidth_ramp(settings: &VideoCodec, frame: u32, frames: u32) -> u32 {
    let min = settings.min_bitrate_kbps;
    let max = settings.max_bitrate_kbps.max(min);
    let progress = frame as f64 / frames.max(1) as f64;
    let position = if progress < 0.75 {
        progress / 0.75
    } else {
        (1.0 - progress) / 0.25
    };
    min + ((max - min) as f64 * position) as u32
}

/// Split `kbps` over spatial layers by their targets, evenly over
/// temporal layers within each
fn allocate(settings: &VideoCodec, kbps: u32) -> VideoBitrateAllocation {
    let layers = settings.layers();
    let total_target: u64 = layers
        .iter()
        .map(|l| l.target_bitrate_kbps.max(1) as u64)
        .sum();
    let mut allocation = VideoBitrateAllocation::new();
    for (s, layer) in layers.iter().enumerate() {
        if !layer.active {
            continue;
        }
        let share_bps =
            kbps as u64 * 1000 * layer.target_bitrate_kbps.max(1) as u64 / total_target.max(1);
        let temporal = layer.num_temporal_layers.max(1) as u64;
        for t in 0..temporal as usize {
            allocation.set_bitrate(s, t, (share_bps / temporal) as u32);
        }
    }
    allocation
}

fn init_logging(args: &Args, config: &LoggingConfig) -> Result<()> {
    use std::fs::File;
    use std::sync::Mutex;

    let log_level = match args.verbose {
        0 => config.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let format = args.log_format.as_deref().unwrap_or(&config.format);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "lamco_encoder_contract={level},lamco_encoder_probe={level},warn",
            level = log_level
        ))
    });

    let log_file = args
        .log_file
        .clone()
        .or_else(|| config.log_file.as_ref().map(|p| p.display().to_string()));

    // If log file is specified, write to both stderr and file
    if let Some(log_file_path) = &log_file {
        let file = Mutex::new(
            File::create(log_file_path)
                .with_context(|| format!("Failed to create log file: {}", log_file_path))?,
        );

        match format {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(std::io::stderr),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(std::io::stderr),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .pretty()
                            .with_writer(std::io::stderr),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
        }
        info!("Logging to file: {}", log_file_path);
    } else {
        // Stderr only, stdout carries the report
        match format {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                    .init();
            }
        }
    }

    Ok(())
}
