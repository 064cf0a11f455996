mod direct;
mod pipeline;
mod probe;
mod process;
mod session;
mod transcode;

pub use direct::DirectDeviceAdapter;
pub use pipeline::PipelineAdapter;
pub use probe::CapabilityQuery;
pub use session::{CaptureStatus, ErrorCallback, FrameCallback};
pub use transcode::TranscodeAdapter;

pub(crate) use process::run_tool;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::{CaptureError, Result};
use crate::types::{CaptureConfig, Codec, DeviceCapabilities};

/// The three ways of pulling frames out of a video device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// `v4l2-ctl` configuration + raw reads from the device node.
    DirectDevice,
    /// A general transcoding process (`ffmpeg`).
    TranscodeProcess,
    /// A media pipeline runner (`gst-launch-1.0`).
    PipelineProcess,
}

impl BackendKind {
    /// Auto-detection order, most capable first.
    pub const PRIORITY: [BackendKind; 3] = [
        BackendKind::PipelineProcess,
        BackendKind::TranscodeProcess,
        BackendKind::DirectDevice,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::DirectDevice => "v4l2",
            BackendKind::TranscodeProcess => "ffmpeg",
            BackendKind::PipelineProcess => "gstreamer",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "v4l2" | "direct" | "direct-device" => Ok(BackendKind::DirectDevice),
            "ffmpeg" | "transcode" | "transcode-process" => Ok(BackendKind::TranscodeProcess),
            "gstreamer" | "pipeline" | "pipeline-process" => Ok(BackendKind::PipelineProcess),
            _ => Err(CaptureError::UnknownBackend(s.to_string())),
        }
    }
}

/// Uniform contract over every capture backend.
///
/// Frames and runtime errors are pushed to the single registered callback of
/// each kind; registering again replaces the previous one.
#[async_trait]
pub trait CaptureAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Configure the device and launch the external process.
    ///
    /// Returns once the process is running, not once frames flow. Fails with
    /// [`CaptureError::AlreadyCapturing`] without touching the running session.
    async fn start_capture(&mut self, config: CaptureConfig) -> Result<()>;

    /// Terminate the external process. Idempotent.
    async fn stop_capture(&mut self);

    /// Switch codec, restarting the capture if one is running.
    async fn set_codec(&mut self, codec: Codec) -> Result<()>;

    /// Switch resolution, restarting the capture if one is running.
    async fn set_resolution(&mut self, width: u32, height: u32) -> Result<()>;

    fn on_frame(&self, callback: FrameCallback);

    fn on_error(&self, callback: ErrorCallback);

    /// Handle that keeps reporting this adapter's running state without
    /// borrowing it.
    fn status(&self) -> CaptureStatus;

    fn is_capturing(&self) -> bool {
        self.status().is_capturing()
    }

    /// Last applied capture configuration.
    fn config(&self) -> Option<&CaptureConfig>;

    /// Capability probe for the configured device, or the default device
    /// before any configuration. Runs independently of the adapter.
    fn capability_query(&self) -> CapabilityQuery;

    /// Probe the device through this backend's tooling.
    async fn get_capabilities(&self) -> Result<DeviceCapabilities> {
        self.capability_query().run().await
    }
}
