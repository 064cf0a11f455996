//! Video capture through external tools.
//!
//! Three interchangeable backends pull frames from a V4L2 device by driving
//! command-line programs: direct device reads (`v4l2-ctl` + `dd`), a
//! transcoder (`ffmpeg`) and a pipeline runner (`gst-launch-1.0`). Pick one
//! explicitly with [`AdapterFactory`], let it be detected, or go through the
//! [`CaptureService`] facade.

pub mod bitstream;
pub mod capture;
pub mod config;
pub mod devices;
pub mod error;
pub mod factory;
pub mod framing;
pub mod output;
pub mod service;
pub mod types;

pub use capture::{
    BackendKind, CapabilityQuery, CaptureAdapter, CaptureStatus, ErrorCallback, FrameCallback,
};
pub use config::Settings;
pub use error::{CaptureError, Result};
pub use factory::{AdapterFactory, ToolProbe, WhichProbe};
pub use service::CaptureService;
pub use types::{
    CaptureConfig, Codec, DeviceCapabilities, FrameData, FrameFormat, HwAccel, PixelLayout,
    Resolution,
};
