//! Plain data describing a capture request, a delivered frame and a probed
//! device.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{CaptureError, Result};

/// Output codec requested from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Codec {
    /// Uncompressed frames in a [`PixelLayout`].
    Raw,
    /// H.264 / AVC bitstream.
    H264,
    /// H.265 / HEVC bitstream.
    Hevc,
}

impl Codec {
    pub fn is_compressed(self) -> bool {
        !matches!(self, Codec::Raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Raw => "raw",
            Codec::H264 => "h264",
            Codec::Hevc => "hevc",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "rawvideo" => Ok(Codec::Raw),
            "h264" | "avc" => Ok(Codec::H264),
            "hevc" | "h265" => Ok(Codec::Hevc),
            other => Err(CaptureError::InvalidConfig(format!("unknown codec '{other}'"))),
        }
    }
}

/// Pixel layout of uncompressed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PixelLayout {
    /// Packed 4:2:2 luma/chroma, 2 bytes per pixel.
    Yuyv,
    /// Planar 4:2:0 (Y plane + interleaved UV), 1.5 bytes per pixel.
    Nv12,
    /// Motion JPEG. Variable size per frame.
    Mjpeg,
    /// Packed 8-bit RGB, 3 bytes per pixel.
    Rgb24,
}

impl PixelLayout {
    /// Bytes occupied by one frame of this layout.
    ///
    /// MJPEG frames are variable-size; `width * height` is only an upper-ish
    /// approximation.
    /// Saturates instead of overflowing; [`CaptureConfig::validate`] keeps
    /// real sessions far below that.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = (width as usize).saturating_mul(height as usize);
        match self {
            PixelLayout::Yuyv => pixels.saturating_mul(2),
            PixelLayout::Nv12 => pixels.saturating_mul(3) / 2,
            PixelLayout::Rgb24 => pixels.saturating_mul(3),
            PixelLayout::Mjpeg => pixels,
        }
    }

    /// Layout a decoding tool delivers for this source layout. MJPEG sources
    /// are decoded to YUYV.
    pub fn decoded(self) -> PixelLayout {
        match self {
            PixelLayout::Mjpeg => PixelLayout::Yuyv,
            layout => layout,
        }
    }

    pub fn is_variable_size(self) -> bool {
        matches!(self, PixelLayout::Mjpeg)
    }

    /// FourCC accepted by `v4l2-ctl --set-fmt-video pixelformat=`.
    pub fn fourcc(self) -> &'static str {
        match self {
            PixelLayout::Yuyv => "YUYV",
            PixelLayout::Nv12 => "NV12",
            PixelLayout::Mjpeg => "MJPG",
            PixelLayout::Rgb24 => "RGB3",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PixelLayout::Yuyv => "yuyv",
            PixelLayout::Nv12 => "nv12",
            PixelLayout::Mjpeg => "mjpeg",
            PixelLayout::Rgb24 => "rgb24",
        }
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelLayout {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "yuyv" | "yuy2" | "yuyv422" | "packed-luma-chroma" => Ok(PixelLayout::Yuyv),
            "nv12" => Ok(PixelLayout::Nv12),
            "mjpeg" | "mjpg" => Ok(PixelLayout::Mjpeg),
            "rgb24" | "rgb" | "rgb3" => Ok(PixelLayout::Rgb24),
            other => Err(CaptureError::InvalidConfig(format!(
                "unknown pixel layout '{other}'"
            ))),
        }
    }
}

/// Hardware encoder hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HwAccel {
    #[default]
    None,
    /// VA-API (Intel / AMD).
    Vaapi,
    /// NVENC (NVIDIA).
    Nvenc,
    /// Intel Quick Sync.
    Qsv,
}

impl fmt::Display for HwAccel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HwAccel::None => "none",
            HwAccel::Vaapi => "vaapi",
            HwAccel::Nvenc => "nvenc",
            HwAccel::Qsv => "qsv",
        })
    }
}

impl FromStr for HwAccel {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(HwAccel::None),
            "vaapi" => Ok(HwAccel::Vaapi),
            "nvenc" | "cuda" => Ok(HwAccel::Nvenc),
            "qsv" => Ok(HwAccel::Qsv),
            other => Err(CaptureError::InvalidConfig(format!(
                "unknown hardware acceleration '{other}'"
            ))),
        }
    }
}

/// Largest accepted frame width or height.
pub const MAX_DIMENSION: u32 = 8192;

/// A capture request. Immutable for the duration of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Device handle, e.g. `/dev/video0`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Target frames per second.
    pub fps: u32,
    pub codec: Codec,
    /// Only meaningful for [`Codec::Raw`].
    pub pixel_layout: Option<PixelLayout>,
    /// Target bitrate in kbit/s. Only meaningful for compressed codecs.
    pub bitrate_kbps: Option<u32>,
    /// Only meaningful for compressed codecs.
    pub hw_accel: HwAccel,
}

impl CaptureConfig {
    /// Raw capture at the given geometry, default layout.
    pub fn new(device: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            device: device.into(),
            width,
            height,
            fps,
            codec: Codec::Raw,
            pixel_layout: None,
            bitrate_kbps: None,
            hw_accel: HwAccel::None,
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_pixel_layout(mut self, layout: PixelLayout) -> Self {
        self.pixel_layout = Some(layout);
        self
    }

    pub fn with_bitrate_kbps(mut self, bitrate: u32) -> Self {
        self.bitrate_kbps = Some(bitrate);
        self
    }

    pub fn with_hw_accel(mut self, hw_accel: HwAccel) -> Self {
        self.hw_accel = hw_accel;
        self
    }

    /// Requested layout, YUYV when unset.
    pub fn layout(&self) -> PixelLayout {
        self.pixel_layout.unwrap_or(PixelLayout::Yuyv)
    }

    /// Byte size of one raw frame in [`Self::layout`].
    pub fn frame_size(&self) -> usize {
        self.layout().frame_size(self.width, self.height)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(CaptureError::InvalidConfig("device must not be empty".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "resolution must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(CaptureError::InvalidConfig(format!(
                "resolution {}x{} exceeds {}x{}",
                self.width, self.height, MAX_DIMENSION, MAX_DIMENSION
            )));
        }
        if self.fps == 0 {
            return Err(CaptureError::InvalidConfig("fps must be positive".into()));
        }
        if self.bitrate_kbps == Some(0) {
            return Err(CaptureError::InvalidConfig("bitrate must be positive".into()));
        }
        Ok(())
    }
}

/// What a delivered buffer contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// One complete uncompressed frame.
    Pixel(PixelLayout),
    /// One coded unit of a compressed bitstream, start code included.
    Encoded(Codec),
}

/// One delivered unit. The adapter keeps no reference to `data` after
/// handing it to the frame callback.
#[derive(Debug, Clone)]
pub struct FrameData {
    pub data: Bytes,
    /// Microseconds since the session started. Non-decreasing within a session.
    pub timestamp_us: u64,
    pub format: FrameFormat,
    pub width: u32,
    pub height: u32,
    /// Only set for compressed codecs.
    pub keyframe: Option<bool>,
}

impl FrameData {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_keyframe(&self) -> bool {
        self.keyframe.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Best-effort capability report parsed from tool output.
///
/// An empty set means "nothing detected", not "nothing supported".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub device: String,
    pub pixel_layouts: BTreeSet<PixelLayout>,
    pub resolutions: BTreeSet<Resolution>,
    pub framerates: BTreeSet<u32>,
    pub hardware_acceleration: bool,
}

impl DeviceCapabilities {
    pub fn empty(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes_follow_layout() {
        assert_eq!(PixelLayout::Yuyv.frame_size(640, 480), 614_400);
        assert_eq!(PixelLayout::Nv12.frame_size(640, 480), 460_800);
        assert_eq!(PixelLayout::Rgb24.frame_size(640, 480), 921_600);
        assert_eq!(PixelLayout::Mjpeg.frame_size(640, 480), 307_200);
    }

    #[test]
    fn default_layout_is_yuyv() {
        let config = CaptureConfig::new("/dev/video0", 640, 480, 30);
        assert_eq!(config.layout(), PixelLayout::Yuyv);
        assert_eq!(config.frame_size(), 614_400);
    }

    #[test]
    fn validate_rejects_zero_geometry() {
        assert!(CaptureConfig::new("/dev/video0", 0, 480, 30).validate().is_err());
        assert!(CaptureConfig::new("/dev/video0", 640, 0, 30).validate().is_err());
        assert!(CaptureConfig::new("/dev/video0", 640, 480, 0).validate().is_err());
        assert!(CaptureConfig::new("", 640, 480, 30).validate().is_err());
        assert!(CaptureConfig::new("/dev/video0", 640, 480, 30).validate().is_ok());
    }

    #[test]
    fn validate_bounds_geometry() {
        let huge = CaptureConfig::new("/dev/video0", u32::MAX, u32::MAX, 30);
        assert!(matches!(huge.validate(), Err(CaptureError::InvalidConfig(_))));
        assert!(CaptureConfig::new("/dev/video0", MAX_DIMENSION + 1, 2, 30)
            .validate()
            .is_err());
        assert!(CaptureConfig::new("/dev/video0", 7680, 4320, 30).validate().is_ok());

        // Sizing an unvalidated request saturates instead of wrapping.
        assert_eq!(PixelLayout::Rgb24.frame_size(u32::MAX, u32::MAX), usize::MAX);
    }

    #[test]
    fn parses_selectors() {
        assert_eq!("h265".parse::<Codec>().unwrap(), Codec::Hevc);
        assert_eq!("packed-luma-chroma".parse::<PixelLayout>().unwrap(), PixelLayout::Yuyv);
        assert_eq!("vaapi".parse::<HwAccel>().unwrap(), HwAccel::Vaapi);
        assert!("vp9".parse::<Codec>().is_err());
    }
}
