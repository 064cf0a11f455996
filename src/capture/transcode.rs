use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::probe::{CapabilityQuery, Report};
use super::process::StreamDecoder;
use super::session::{CaptureStatus, Session};
use super::{BackendKind, CaptureAdapter, ErrorCallback, FrameCallback};
use crate::config::{CompressedContainer, TranscodeSettings, DEFAULT_DEVICE};
use crate::error::Result;
use crate::types::{CaptureConfig, Codec, HwAccel, PixelLayout};

/// Captures through a general-purpose transcoder (`ffmpeg`).
///
/// Raw output is reassembled into fixed-size frames; compressed output is
/// split into coded units at start codes.
pub struct TranscodeAdapter {
    settings: TranscodeSettings,
    probe_device: String,
    session: Session,
}

impl TranscodeAdapter {
    pub fn new(settings: TranscodeSettings) -> Self {
        Self {
            settings,
            probe_device: DEFAULT_DEVICE.to_string(),
            session: Session::new(),
        }
    }

    pub fn with_probe_device(mut self, device: impl Into<String>) -> Self {
        self.probe_device = device.into();
        self
    }

    async fn restart(&mut self, config: CaptureConfig) -> Result<()> {
        if self.session.is_capturing() {
            self.stop_capture().await;
            self.start_capture(config).await?;
        }
        Ok(())
    }
}

impl Default for TranscodeAdapter {
    fn default() -> Self {
        Self::new(TranscodeSettings::default())
    }
}

fn pix_fmt(layout: PixelLayout) -> &'static str {
    match layout {
        PixelLayout::Yuyv => "yuyv422",
        PixelLayout::Nv12 => "nv12",
        PixelLayout::Rgb24 => "rgb24",
        PixelLayout::Mjpeg => "mjpeg",
    }
}

/// Encoder name for `codec` given the acceleration hint.
pub(crate) fn encoder(codec: Codec, hw_accel: HwAccel) -> &'static str {
    match (codec, hw_accel) {
        (Codec::Raw, _) => "rawvideo",
        (Codec::H264, HwAccel::Vaapi) => "h264_vaapi",
        (Codec::H264, HwAccel::Nvenc) => "h264_nvenc",
        (Codec::H264, HwAccel::Qsv) => "h264_qsv",
        (Codec::H264, HwAccel::None) => "libx264",
        (Codec::Hevc, HwAccel::Vaapi) => "hevc_vaapi",
        (Codec::Hevc, HwAccel::Nvenc) => "hevc_nvenc",
        (Codec::Hevc, HwAccel::Qsv) => "hevc_qsv",
        (Codec::Hevc, HwAccel::None) => "libx265",
    }
}

/// Full `ffmpeg` command line for `config`, writing to stdout.
pub(crate) fn build_args(config: &CaptureConfig, settings: &TranscodeSettings) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "warning".into()];

    // Input side.
    args.extend(["-f".into(), "v4l2".into()]);
    if let Some(layout) = config.pixel_layout {
        args.extend(["-input_format".into(), pix_fmt(layout).into()]);
    }
    args.extend([
        "-framerate".into(),
        config.fps.to_string(),
        "-video_size".into(),
        format!("{}x{}", config.width, config.height),
    ]);

    let compressed = config.codec.is_compressed();
    if compressed {
        match config.hw_accel {
            HwAccel::Vaapi => args.extend(["-vaapi_device".into(), settings.vaapi_device.clone()]),
            HwAccel::Nvenc => args.extend(["-hwaccel".into(), "cuda".into()]),
            HwAccel::Qsv => args.extend(["-hwaccel".into(), "qsv".into()]),
            HwAccel::None => {}
        }
    }
    args.extend(["-i".into(), config.device.clone()]);

    // Output side.
    if compressed && config.hw_accel == HwAccel::Vaapi {
        args.extend(["-vf".into(), "format=nv12,hwupload".into()]);
    }
    args.extend(["-c:v".into(), encoder(config.codec, config.hw_accel).into()]);

    let format = if compressed {
        if let Some(bitrate) = config.bitrate_kbps {
            args.extend(["-b:v".into(), format!("{bitrate}k")]);
        }
        match (settings.container, config.codec) {
            (CompressedContainer::Transport, _) => "mpegts",
            (CompressedContainer::Elementary, Codec::Hevc) => "hevc",
            (CompressedContainer::Elementary, _) => "h264",
        }
    } else {
        args.extend(["-pix_fmt".into(), pix_fmt(config.layout().decoded()).into()]);
        "rawvideo"
    };
    args.extend(["-f".into(), format.into(), "pipe:1".into()]);
    args
}

#[async_trait]
impl CaptureAdapter for TranscodeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::TranscodeProcess
    }

    async fn start_capture(&mut self, config: CaptureConfig) -> Result<()> {
        self.session.ensure_idle()?;
        config.validate()?;

        let emitter = self.session.begin(&config)?;
        let args = build_args(&config, &self.settings);
        info!(
            "Transcode capture {} {}x{} @ {}fps, codec {} ({})",
            config.device,
            config.width,
            config.height,
            config.fps,
            config.codec,
            encoder(config.codec, config.hw_accel)
        );
        debug!("{} args: {:?}", self.settings.ffmpeg_bin, args);

        let decoder = if config.codec.is_compressed() {
            StreamDecoder::units(config.codec)
        } else {
            StreamDecoder::raw(config.layout().decoded(), config.width, config.height)
        };

        let mut command = Command::new(&self.settings.ffmpeg_bin);
        command.args(&args);
        let program = self.settings.ffmpeg_bin.clone();
        self.session.launch(command, &program, decoder, emitter)
    }

    async fn stop_capture(&mut self) {
        if self.session.end() {
            info!("Transcode capture stopped");
        }
    }

    async fn set_codec(&mut self, codec: Codec) -> Result<()> {
        match self.session.update_config(|c| c.codec = codec)? {
            Some(config) => self.restart(config).await,
            None => Ok(()),
        }
    }

    async fn set_resolution(&mut self, width: u32, height: u32) -> Result<()> {
        let updated = self.session.update_config(|c| {
            c.width = width;
            c.height = height;
        })?;
        match updated {
            Some(config) => self.restart(config).await,
            None => Ok(()),
        }
    }

    fn on_frame(&self, callback: FrameCallback) {
        self.session.set_on_frame(callback);
    }

    fn on_error(&self, callback: ErrorCallback) {
        self.session.set_on_error(callback);
    }

    fn status(&self) -> CaptureStatus {
        self.session.status()
    }

    fn config(&self) -> Option<&CaptureConfig> {
        self.session.config()
    }

    fn capability_query(&self) -> CapabilityQuery {
        let device = self.session.device_or(&self.probe_device);
        let args: Vec<String> = ["-hide_banner", "-f", "v4l2", "-list_formats", "all", "-i", device.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        CapabilityQuery::new(&self.settings.ffprobe_bin, args, device, Report::Ffmpeg)
    }
}
