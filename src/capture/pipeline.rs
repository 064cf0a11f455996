//! Pipeline-runner backend
//!
//! ```text
//! v4l2src device=<dev>
//!   → <caps filter: layout, size, rate>
//!   → videoconvert
//!   → raw:        video/x-raw,format=<layout> → fdsink fd=1   (frames on stdout)
//!   → compressed: <encoder> → mpegtsmux → filesink location=<recording_path>
//! ```
//!
//! Compressed output is written to the recording file, so no frames reach the
//! frame callback in that mode.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::probe::{CapabilityQuery, Report};
use super::process::StreamDecoder;
use super::session::{CaptureStatus, Session};
use super::{BackendKind, CaptureAdapter, ErrorCallback, FrameCallback};
use crate::config::{PipelineSettings, DEFAULT_DEVICE};
use crate::error::Result;
use crate::types::{CaptureConfig, Codec, HwAccel, PixelLayout};

pub struct PipelineAdapter {
    settings: PipelineSettings,
    probe_device: String,
    session: Session,
}

impl PipelineAdapter {
    pub fn new(settings: PipelineSettings) -> Self {
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

impl Default for PipelineAdapter {
    fn default() -> Self {
        Self::new(PipelineSettings::default())
    }
}

fn gst_format(layout: PixelLayout) -> &'static str {
    match layout {
        PixelLayout::Yuyv => "YUY2",
        PixelLayout::Nv12 => "NV12",
        PixelLayout::Rgb24 => "RGB",
        PixelLayout::Mjpeg => "YUY2",
    }
}

/// Encoder element (with properties) for `codec` given the acceleration hint.
pub(crate) fn encoder(codec: Codec, hw_accel: HwAccel) -> Option<&'static str> {
    let element = match (codec, hw_accel) {
        (Codec::Raw, _) => return None,
        (Codec::H264, HwAccel::Vaapi) => "vaapih264enc",
        (Codec::H264, HwAccel::Nvenc) => "nvh264enc",
        (Codec::H264, HwAccel::Qsv) => "qsvh264enc",
        (Codec::H264, HwAccel::None) => "x264enc tune=zerolatency",
        (Codec::Hevc, HwAccel::Vaapi) => "vaapih265enc",
        (Codec::Hevc, HwAccel::Nvenc) => "nvh265enc",
        (Codec::Hevc, HwAccel::Qsv) => "qsvh265enc",
        (Codec::Hevc, HwAccel::None) => "x265enc tune=zerolatency",
    };
    Some(element)
}

/// Pipeline description handed to the runner as a single argument.
pub(crate) fn build_description(config: &CaptureConfig, settings: &PipelineSettings) -> String {
    let (w, h, fps) = (config.width, config.height, config.fps);
    let layout = config.layout();

    let source_caps = match layout {
        PixelLayout::Mjpeg => format!("image/jpeg,width={w},height={h},framerate={fps}/1 ! jpegdec"),
        other => format!(
            "video/x-raw,format={},width={w},height={h},framerate={fps}/1",
            gst_format(other)
        ),
    };
    let mut stages = vec![
        format!("v4l2src device={}", config.device),
        source_caps,
        "videoconvert".to_string(),
    ];

    match encoder(config.codec, config.hw_accel) {
        Some(element) => {
            let mut enc = element.to_string();
            if let Some(bitrate) = config.bitrate_kbps {
                enc.push_str(&format!(" bitrate={bitrate}"));
            }
            stages.push(enc);
            stages.push("mpegtsmux".to_string());
            stages.push(format!(
                "filesink location={}",
                settings.recording_path.display()
            ));
        }
        None => {
            stages.push(format!(
                "video/x-raw,format={}",
                gst_format(config.layout().decoded())
            ));
            stages.push("fdsink fd=1 sync=false".to_string());
        }
    }
    stages.join(" ! ")
}

#[async_trait]
impl CaptureAdapter for PipelineAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::PipelineProcess
    }

    async fn start_capture(&mut self, config: CaptureConfig) -> Result<()> {
        self.session.ensure_idle()?;
        config.validate()?;

        let emitter = self.session.begin(&config)?;
        let description = build_description(&config, &self.settings);
        info!(
            "Pipeline capture {} {}x{} @ {}fps, codec {}",
            config.device, config.width, config.height, config.fps, config.codec
        );
        debug!("Pipeline: {}", description);

        let decoder = if config.codec.is_compressed() {
            warn!(
                "Compressed output is recorded to {}; frame callback will not fire",
                self.settings.recording_path.display()
            );
            StreamDecoder::Discard
        } else {
            StreamDecoder::raw(config.layout().decoded(), config.width, config.height)
        };

        // -q keeps the runner's own status lines off stdout.
        let mut command = Command::new(&self.settings.launch_bin);
        command.arg("-q").arg(&description);
        let program = self.settings.launch_bin.clone();
        self.session.launch(command, &program, decoder, emitter)
    }

    async fn stop_capture(&mut self) {
        if self.session.end() {
            info!("Pipeline capture stopped");
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
        let args = vec!["Video/Source".to_string()];
        CapabilityQuery::new(&self.settings.monitor_bin, args, device, Report::GstMonitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use std::path::PathBuf;

    #[test]
    fn raw_pipeline() {
        let config = CaptureConfig::new("/dev/video0", 640, 480, 30);
        assert_eq!(
            build_description(&config, &PipelineSettings::default()),
            "v4l2src device=/dev/video0 ! video/x-raw,format=YUY2,width=640,height=480,framerate=30/1 \
             ! videoconvert ! video/x-raw,format=YUY2 ! fdsink fd=1 sync=false"
        );
    }

    #[test]
    fn mjpeg_source_is_decoded() {
        let config =
            CaptureConfig::new("/dev/video0", 1280, 720, 30).with_pixel_layout(PixelLayout::Mjpeg);
        let description = build_description(&config, &PipelineSettings::default());
        assert!(description.contains("image/jpeg,width=1280,height=720,framerate=30/1 ! jpegdec"));
        assert!(description.ends_with("video/x-raw,format=YUY2 ! fdsink fd=1 sync=false"));
    }

    #[test]
    fn compressed_pipeline_records_to_file() {
        let settings = PipelineSettings {
            recording_path: PathBuf::from("/tmp/out.ts"),
            ..Default::default()
        };
        let config = CaptureConfig::new("/dev/video1", 1920, 1080, 30)
            .with_codec(Codec::H264)
            .with_bitrate_kbps(2500);
        assert_eq!(
            build_description(&config, &settings),
            "v4l2src device=/dev/video1 ! video/x-raw,format=YUY2,width=1920,height=1080,framerate=30/1 \
             ! videoconvert ! x264enc tune=zerolatency bitrate=2500 ! mpegtsmux \
             ! filesink location=/tmp/out.ts"
        );
    }

    #[test]
    fn encoder_table() {
        assert_eq!(encoder(Codec::Hevc, HwAccel::Vaapi), Some("vaapih265enc"));
        assert_eq!(encoder(Codec::H264, HwAccel::Nvenc), Some("nvh264enc"));
        assert_eq!(encoder(Codec::Raw, HwAccel::Nvenc), None);
    }

    #[test]
    fn capability_query_follows_configured_device() {
        let adapter = PipelineAdapter::new(PipelineSettings::default()).with_probe_device("/dev/video4");
        let query = adapter.capability_query();
        assert_eq!(query.program(), "gst-device-monitor-1.0");
        assert_eq!(query.args().to_vec(), vec!["Video/Source".to_string()]);
        assert_eq!(query.device(), "/dev/video4");
    }

    #[tokio::test]
    async fn failing_monitor_reports_probe_error() {
        let adapter = PipelineAdapter::new(PipelineSettings {
            monitor_bin: "false".into(),
            ..Default::default()
        });
        let err = adapter.get_capabilities().await.unwrap_err();
        assert!(matches!(err, CaptureError::Probe(_)));
    }
}
