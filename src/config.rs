//! Tool locations and per-backend knobs.

use std::path::PathBuf;

/// Device probed by `get_capabilities` before any capture config is applied.
pub const DEFAULT_DEVICE: &str = "/dev/video0";

#[derive(Debug, Clone)]
pub struct Settings {
    pub default_device: String,
    pub direct: DirectSettings,
    pub transcode: TranscodeSettings,
    pub pipeline: PipelineSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_device: DEFAULT_DEVICE.to_string(),
            direct: DirectSettings::default(),
            transcode: TranscodeSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

/// Direct-device backend: kernel control utility + raw block reader.
#[derive(Debug, Clone)]
pub struct DirectSettings {
    pub control_bin: String,
    pub reader_bin: String,
}

impl Default for DirectSettings {
    fn default() -> Self {
        Self {
            control_bin: "v4l2-ctl".to_string(),
            reader_bin: "dd".to_string(),
        }
    }
}

/// Container written to stdout by the transcoder for compressed codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressedContainer {
    /// MPEG transport stream (`-f mpegts`).
    ///
    /// The unit scanner still splits on Annex B start codes, so a delivered
    /// unit is a slice of the transport stream: it begins at a NAL start code
    /// but may carry the 188-byte packet headers and PES headers that follow
    /// it up to the next start code. Suitable for recording or remuxing the
    /// byte stream as a whole. Use [`CompressedContainer::Elementary`] when
    /// each unit must be a clean NAL unit.
    #[default]
    Transport,
    /// Bare Annex B elementary stream (`-f h264` / `-f hevc`).
    Elementary,
}

#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// Render node handed to `-vaapi_device`.
    pub vaapi_device: String,
    pub container: CompressedContainer,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            vaapi_device: "/dev/dri/renderD128".to_string(),
            container: CompressedContainer::Transport,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub launch_bin: String,
    pub monitor_bin: String,
    /// File written by the muxing sink for compressed codecs.
    pub recording_path: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            launch_bin: "gst-launch-1.0".to_string(),
            monitor_bin: "gst-device-monitor-1.0".to_string(),
            recording_path: PathBuf::from("capture.ts"),
        }
    }
}
