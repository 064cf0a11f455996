use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use vidcap::config::{CompressedContainer, Settings};
use vidcap::devices;
use vidcap::output::{OutputSink, RawFileSink, SnapshotSink};
use vidcap::{
    AdapterFactory, BackendKind, CaptureConfig, CaptureError, CaptureService, Codec, FrameData,
    HwAccel, PixelLayout, WhichProbe,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Device control utility
    #[arg(long, global = true, default_value = "v4l2-ctl")]
    v4l2_ctl: String,

    /// Block reader used by the direct backend
    #[arg(long, global = true, default_value = "dd")]
    dd: String,

    /// Transcoder binary
    #[arg(long, global = true, default_value = "ffmpeg")]
    ffmpeg: String,

    /// Prober used for transcoder capability queries
    #[arg(long, global = true, default_value = "ffprobe")]
    ffprobe: String,

    /// Pipeline runner binary
    #[arg(long, global = true, default_value = "gst-launch-1.0")]
    gst_launch: String,

    /// Device monitor used for pipeline capability queries
    #[arg(long, global = true, default_value = "gst-device-monitor-1.0")]
    gst_device_monitor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List video device nodes
    Devices {
        /// Directory holding the device nodes
        #[arg(long, default_value = "/dev")]
        dir: PathBuf,

        /// Query each device and suggest a backend
        #[arg(long)]
        inspect: bool,
    },

    /// Report which backend auto-detection would pick
    Detect,

    /// Probe device capabilities
    Caps {
        /// Backend to probe with (v4l2, ffmpeg, gstreamer); detected if omitted
        #[arg(short, long)]
        backend: Option<String>,

        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
    },

    /// Capture frames from a device
    Capture(CaptureArgs),
}

#[derive(clap::Args, Debug)]
struct CaptureArgs {
    /// Backend to capture with (v4l2, ffmpeg, gstreamer); detected if omitted
    #[arg(short, long)]
    backend: Option<String>,

    #[arg(short, long, default_value = "/dev/video0")]
    device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Output codec (raw, h264, hevc)
    #[arg(long, default_value = "raw")]
    codec: String,

    /// Pixel layout for raw capture (yuyv, nv12, mjpeg, rgb24)
    #[arg(long)]
    pixel_layout: Option<String>,

    /// Target bitrate in kbit/s for compressed codecs
    #[arg(long)]
    bitrate: Option<u32>,

    /// Hardware encoder (none, vaapi, nvenc, qsv)
    #[arg(long, default_value = "none")]
    hw_accel: String,

    /// Stop after this many frames (0 runs until Ctrl+C)
    #[arg(short = 'n', long, default_value_t = 0)]
    frames: u64,

    /// Append every delivered buffer to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Save the first raw frame as an image
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Emit a bare elementary stream instead of MPEG-TS from the transcoder,
    /// so each delivered unit is one clean NAL unit
    #[arg(long)]
    elementary: bool,

    /// File the pipeline backend records compressed output to
    #[arg(long, default_value = "capture.ts")]
    recording: PathBuf,
}

impl Args {
    fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.direct.control_bin = self.v4l2_ctl.clone();
        settings.direct.reader_bin = self.dd.clone();
        settings.transcode.ffmpeg_bin = self.ffmpeg.clone();
        settings.transcode.ffprobe_bin = self.ffprobe.clone();
        settings.pipeline.launch_bin = self.gst_launch.clone();
        settings.pipeline.monitor_bin = self.gst_device_monitor.clone();
        settings
    }
}

impl CaptureArgs {
    fn config(&self) -> Result<CaptureConfig> {
        let codec: Codec = self.codec.parse()?;
        let hw_accel: HwAccel = self.hw_accel.parse()?;
        let mut config = CaptureConfig::new(&self.device, self.width, self.height, self.fps)
            .with_codec(codec)
            .with_hw_accel(hw_accel);
        if let Some(layout) = &self.pixel_layout {
            config = config.with_pixel_layout(layout.parse::<PixelLayout>()?);
        }
        if let Some(bitrate) = self.bitrate {
            config = config.with_bitrate_kbps(bitrate);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let mut settings = args.settings();
    match &args.command {
        Command::Devices { dir, inspect } => list_devices(dir, *inspect, &settings).await,
        Command::Detect => {
            let kind = AdapterFactory::detect_best_adapter(&settings, &WhichProbe)
                .await
                .context("Backend detection failed")?;
            println!("{kind}");
            Ok(())
        }
        Command::Caps { backend, device } => {
            settings.default_device = device.clone();
            let kind = choose_backend(backend.as_deref(), &settings).await?;
            let adapter = AdapterFactory::create_adapter(kind, &settings);
            let caps = adapter
                .get_capabilities()
                .await
                .with_context(|| format!("Failed to probe {device} with {kind}"))?;
            print_capabilities(kind, &caps);
            Ok(())
        }
        Command::Capture(capture) => {
            if capture.elementary {
                settings.transcode.container = CompressedContainer::Elementary;
            }
            settings.pipeline.recording_path = capture.recording.clone();
            settings.default_device = capture.device.clone();
            run_capture(capture, &settings).await
        }
    }
}

async fn choose_backend(name: Option<&str>, settings: &Settings) -> Result<BackendKind> {
    match name {
        Some(name) => Ok(name.parse()?),
        None => AdapterFactory::detect_best_adapter(settings, &WhichProbe)
            .await
            .context("Backend detection failed"),
    }
}

async fn list_devices(dir: &Path, inspect: bool, settings: &Settings) -> Result<()> {
    let found = devices::list_video_devices(dir)?;
    if found.is_empty() {
        tracing::info!("No video devices under {}", dir.display());
    }
    for device in found {
        if inspect {
            let path = device.to_string_lossy();
            let kind = devices::inspect_device(&settings.direct.control_bin, &path).await?;
            println!("{}\t{}", device.display(), kind);
        } else {
            println!("{}", device.display());
        }
    }
    Ok(())
}

fn print_capabilities(kind: BackendKind, caps: &vidcap::DeviceCapabilities) {
    let join = |items: Vec<String>| {
        if items.is_empty() {
            "(none detected)".to_string()
        } else {
            items.join(", ")
        }
    };
    println!("device:       {}", caps.device);
    println!("backend:      {}", kind);
    println!(
        "layouts:      {}",
        join(caps.pixel_layouts.iter().map(|l| l.to_string()).collect())
    );
    println!(
        "resolutions:  {}",
        join(caps.resolutions.iter().map(|r| r.to_string()).collect())
    );
    println!(
        "frame rates:  {}",
        join(caps.framerates.iter().map(|f| f.to_string()).collect())
    );
    println!("hw accel:     {}", caps.hardware_acceleration);
}

async fn run_capture(capture: &CaptureArgs, settings: &Settings) -> Result<()> {
    let config = capture.config()?;
    let kind = choose_backend(capture.backend.as_deref(), settings).await?;

    tracing::info!("vidcap starting");
    tracing::info!("Backend: {}", kind);
    tracing::info!("Capture: {}x{} @ {}fps", config.width, config.height, config.fps);
    tracing::info!("Codec: {}", config.codec);

    let mut sinks: Vec<Box<dyn OutputSink>> = Vec::new();
    if let Some(path) = &capture.output {
        sinks.push(Box::new(RawFileSink::create(path)?));
    }
    if let Some(path) = &capture.snapshot {
        if config.codec.is_compressed() {
            tracing::warn!("Snapshots need raw frames, ignoring --snapshot for {}", config.codec);
        } else {
            sinks.push(Box::new(SnapshotSink::new(path)));
        }
    }

    let service = CaptureService::new(kind, settings);
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<FrameData>();
    let (error_tx, mut error_rx) = mpsc::unbounded_channel::<CaptureError>();
    service.on_frame(move |frame| {
        let _ = frame_tx.send(frame);
    });
    service.on_error(move |err| {
        let _ = error_tx.send(err);
    });

    service
        .start_capture(config)
        .await
        .context("Failed to start capture")?;
    tracing::info!("Press Ctrl+C to stop");

    let result = pump_frames(&service, &mut frame_rx, &mut error_rx, &mut sinks, capture.frames).await;

    service.stop_capture().await;
    for sink in &mut sinks {
        sink.finish()?;
    }
    result
}

async fn pump_frames(
    service: &CaptureService,
    frames: &mut mpsc::UnboundedReceiver<FrameData>,
    errors: &mut mpsc::UnboundedReceiver<CaptureError>,
    sinks: &mut [Box<dyn OutputSink>],
    limit: u64,
) -> Result<()> {
    let started = Instant::now();
    let mut frame_count = 0u64;
    let mut keyframes = 0u64;
    let mut total_bytes = 0u64;
    let mut total_output_time = Duration::ZERO;
    let mut liveness = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            Some(frame) = frames.recv() => {
                let output_start = Instant::now();
                for sink in sinks.iter_mut() {
                    sink.write_frame(&frame).context("Failed to write frame")?;
                }
                total_output_time += output_start.elapsed();

                frame_count += 1;
                total_bytes += frame.len() as u64;
                if frame.is_keyframe() {
                    keyframes += 1;
                }

                // Log stats every 30 frames
                if frame_count % 30 == 0 {
                    let elapsed = started.elapsed().as_secs_f64();
                    tracing::info!(
                        "Frame {}: {:.1} fps, avg {} bytes, {} keyframes, output={:.1}ms",
                        frame_count,
                        frame_count as f64 / elapsed,
                        total_bytes / frame_count,
                        keyframes,
                        total_output_time.as_secs_f64() * 1000.0 / frame_count as f64
                    );
                }
                if limit > 0 && frame_count >= limit {
                    tracing::info!("Captured {} frames", frame_count);
                    return Ok(());
                }
            }
            Some(err) = errors.recv() => {
                bail!("Capture failed after {} frames: {}", frame_count, err);
            }
            _ = liveness.tick() => {
                if !service.is_capturing() {
                    if let Ok(err) = errors.try_recv() {
                        bail!("Capture failed after {} frames: {}", frame_count, err);
                    }
                    // Drain what the reader delivered before going idle.
                    while let Ok(frame) = frames.try_recv() {
                        for sink in sinks.iter_mut() {
                            sink.write_frame(&frame).context("Failed to write frame")?;
                        }
                        frame_count += 1;
                    }
                    tracing::info!("Capture ended after {} frames", frame_count);
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted after {} frames", frame_count);
                return Ok(());
            }
        }
    }
}
