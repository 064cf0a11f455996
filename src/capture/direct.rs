use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::process::{run_tool, StreamDecoder};
use super::probe::{CapabilityQuery, Report};
use super::session::{CaptureStatus, Session};
use super::{BackendKind, CaptureAdapter, ErrorCallback, FrameCallback};
use crate::config::{DirectSettings, DEFAULT_DEVICE};
use crate::error::{CaptureError, Result};
use crate::types::{CaptureConfig, Codec, PixelLayout};

/// Captures raw frames straight from the device node.
///
/// The device is configured with the kernel control utility, then a block
/// reader streams the node to stdout in frame-sized blocks. Only
/// [`Codec::Raw`] is supported.
pub struct DirectDeviceAdapter {
    settings: DirectSettings,
    probe_device: String,
    session: Session,
}

impl DirectDeviceAdapter {
    pub fn new(settings: DirectSettings) -> Self {
        Self {
            settings,
            probe_device: DEFAULT_DEVICE.to_string(),
            session: Session::new(),
        }
    }

    /// Device probed by [`CaptureAdapter::get_capabilities`] before any
    /// capture has been configured.
    pub fn with_probe_device(mut self, device: impl Into<String>) -> Self {
        self.probe_device = device.into();
        self
    }

    fn check_codec(codec: Codec) -> Result<()> {
        if codec != Codec::Raw {
            return Err(CaptureError::UnsupportedCodec {
                backend: BackendKind::DirectDevice,
                codec,
            });
        }
        Ok(())
    }

    async fn configure_device(&self, config: &CaptureConfig) -> Result<()> {
        let program = &self.settings.control_bin;
        let (status, _, stderr) = run_tool(program, &control_args(config)).await?;
        if !status.success() {
            return Err(CaptureError::DeviceConfig(format!(
                "{} {}: {}",
                program,
                status,
                stderr.trim()
            )));
        }
        debug!("{} configured {}", program, config.device);
        Ok(())
    }

    async fn restart(&mut self, config: CaptureConfig) -> Result<()> {
        if self.session.is_capturing() {
            self.stop_capture().await;
            self.start_capture(config).await?;
        }
        Ok(())
    }
}

impl Default for DirectDeviceAdapter {
    fn default() -> Self {
        Self::new(DirectSettings::default())
    }
}

/// Arguments for the control utility: format, size and rate.
pub(crate) fn control_args(config: &CaptureConfig) -> Vec<String> {
    vec![
        "--device".to_string(),
        config.device.clone(),
        "--set-fmt-video".to_string(),
        format!(
            "width={},height={},pixelformat={}",
            config.width,
            config.height,
            config.layout().fourcc()
        ),
        "--set-parm".to_string(),
        config.fps.to_string(),
    ]
}

/// Arguments for the block reader, one frame per block.
pub(crate) fn reader_args(config: &CaptureConfig) -> Vec<String> {
    vec![
        format!("if={}", config.device),
        format!("bs={}", config.frame_size()),
        "status=none".to_string(),
    ]
}

#[async_trait]
impl CaptureAdapter for DirectDeviceAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::DirectDevice
    }

    async fn start_capture(&mut self, config: CaptureConfig) -> Result<()> {
        self.session.ensure_idle()?;
        config.validate()?;
        Self::check_codec(config.codec)?;

        let layout = config.layout();
        if layout == PixelLayout::Mjpeg {
            warn!(
                "MJPEG frames are variable-size, slicing at an approximate {} bytes",
                config.frame_size()
            );
        }

        let emitter = self.session.begin(&config)?;
        if let Err(err) = self.configure_device(&config).await {
            return Err(self.session.fail(err));
        }

        let args = reader_args(&config);
        info!(
            "Direct capture {} {}x{} @ {}fps ({}, {} bytes/frame)",
            config.device,
            config.width,
            config.height,
            config.fps,
            layout,
            config.frame_size()
        );
        debug!("{} args: {:?}", self.settings.reader_bin, args);

        let mut command = Command::new(&self.settings.reader_bin);
        command.args(&args);
        let decoder = StreamDecoder::raw(layout, config.width, config.height);
        let program = self.settings.reader_bin.clone();
        self.session.launch(command, &program, decoder, emitter)
    }

    async fn stop_capture(&mut self) {
        if self.session.end() {
            info!("Direct capture stopped");
        }
    }

    async fn set_codec(&mut self, codec: Codec) -> Result<()> {
        Self::check_codec(codec)?;
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
        let args = vec![
            "--device".to_string(),
            device.clone(),
            "--list-formats-ext".to_string(),
        ];
        CapabilityQuery::new(&self.settings.control_bin, args, device, Report::V4l2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CaptureConfig {
        CaptureConfig::new("/dev/video0", 640, 480, 30).with_pixel_layout(PixelLayout::Yuyv)
    }

    #[test]
    fn control_arguments() {
        assert_eq!(
            control_args(&config().with_pixel_layout(PixelLayout::Nv12)),
            vec![
                "--device",
                "/dev/video0",
                "--set-fmt-video",
                "width=640,height=480,pixelformat=NV12",
                "--set-parm",
                "30"
            ]
        );
    }

    #[test]
    fn reader_reads_whole_frames() {
        assert_eq!(
            reader_args(&config()),
            vec!["if=/dev/video0", "bs=614400", "status=none"]
        );
    }

    #[tokio::test]
    async fn compressed_codecs_are_rejected_without_launching() {
        let mut adapter = DirectDeviceAdapter::new(DirectSettings {
            control_bin: "/nonexistent/v4l2-ctl".into(),
            reader_bin: "/nonexistent/dd".into(),
        });

        let err = adapter
            .start_capture(config().with_codec(Codec::H264))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CaptureError::UnsupportedCodec {
                backend: BackendKind::DirectDevice,
                codec: Codec::H264
            }
        );
        assert!(!adapter.is_capturing());
        assert!(adapter.config().is_none());

        assert!(adapter.set_codec(Codec::Hevc).await.is_err());
        assert!(adapter.set_codec(Codec::Raw).await.is_ok());
    }
}
