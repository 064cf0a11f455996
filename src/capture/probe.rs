//! Capability queries and report parsers
//!
//! Every backend probes the device with a different tool and each tool prints
//! free text in its own shape. Parsing is best effort: unknown lines are
//! ignored and missing information leaves the corresponding set empty.

use tracing::debug;

use super::process::run_tool;
use crate::error::{CaptureError, Result};
use crate::types::{DeviceCapabilities, PixelLayout, Resolution};

/// Shape of the text a capability tool prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Report {
    /// `v4l2-ctl --list-formats-ext`
    V4l2,
    /// `ffprobe -list_formats all`, which exits non-zero after listing.
    Ffmpeg,
    /// `gst-device-monitor-1.0`
    GstMonitor,
}

/// A capability lookup detached from the adapter that built it.
///
/// Owns the tool invocation outright, so it can run while the adapter is
/// busy starting or stopping a capture.
#[derive(Debug, Clone)]
pub struct CapabilityQuery {
    program: String,
    args: Vec<String>,
    device: String,
    report: Report,
}

impl CapabilityQuery {
    pub(crate) fn new(
        program: impl Into<String>,
        args: Vec<String>,
        device: impl Into<String>,
        report: Report,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            device: device.into(),
            report,
        }
    }

    /// Device the report will describe.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub async fn run(self) -> Result<DeviceCapabilities> {
        let (status, stdout, stderr) = run_tool(&self.program, &self.args).await?;
        match self.report {
            Report::Ffmpeg => {
                debug!("{} exited with {}", self.program, status);
                Ok(parse_ffmpeg_formats(&self.device, &format!("{stdout}{stderr}")))
            }
            _ if !status.success() => Err(CaptureError::Probe(format!(
                "{} {}: {}",
                self.program,
                status,
                stderr.trim()
            ))),
            Report::V4l2 => Ok(parse_v4l2_formats(&self.device, &stdout)),
            Report::GstMonitor => Ok(parse_gst_device_monitor(&self.device, &stdout)),
        }
    }
}

/// Parse `v4l2-ctl --list-formats-ext` output.
///
/// ```text
/// [0]: 'YUYV' (YUYV 4:2:2)
///         Size: Discrete 640x480
///                 Interval: Discrete 0.033s (30.000 fps)
/// ```
fn parse_v4l2_formats(device: &str, output: &str) -> DeviceCapabilities {
    let mut caps = DeviceCapabilities::empty(device);
    for (needle, layout) in [
        ("YUYV", PixelLayout::Yuyv),
        ("MJPG", PixelLayout::Mjpeg),
        ("NV12", PixelLayout::Nv12),
        ("RGB3", PixelLayout::Rgb24),
    ] {
        if output.contains(needle) {
            caps.pixel_layouts.insert(layout);
        }
    }

    caps.resolutions.extend(scan_dimensions(output));

    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with("Interval:") {
            continue;
        }
        if let Some(fps) = line
            .split_once('(')
            .and_then(|(_, rest)| rest.split_once(" fps"))
            .and_then(|(num, _)| num.trim().parse::<f64>().ok())
        {
            if fps >= 1.0 {
                caps.framerates.insert(fps.round() as u32);
            }
        }
    }
    caps
}

/// Parse the combined stdout/stderr of `ffprobe -f v4l2 -list_formats all`.
///
/// ```text
/// [video4linux2,v4l2 @ 0x..] Raw       :     yuyv422 :  YUYV 4:2:2 : 640x480 320x240
/// [video4linux2,v4l2 @ 0x..] Compressed:       mjpeg :  Motion-JPEG : 1280x720 640x480
/// ```
fn parse_ffmpeg_formats(device: &str, output: &str) -> DeviceCapabilities {
    let mut caps = DeviceCapabilities::empty(device);
    for (needle, layout) in [
        ("yuyv422", PixelLayout::Yuyv),
        ("mjpeg", PixelLayout::Mjpeg),
        ("nv12", PixelLayout::Nv12),
        ("rgb24", PixelLayout::Rgb24),
    ] {
        if output.contains(needle) {
            caps.pixel_layouts.insert(layout);
        }
    }
    caps.resolutions.extend(scan_dimensions(output));
    caps.hardware_acceleration = mentions_accelerator(output);
    caps
}

/// Parse `gst-device-monitor-1.0 Video/Source` output.
///
/// When a `Device found:` block mentions `device`, only that block is read.
fn parse_gst_device_monitor(device: &str, output: &str) -> DeviceCapabilities {
    let scope = device_block(output, device).unwrap_or(output);

    let mut caps = DeviceCapabilities::empty(device);
    for (needle, layout) in [
        ("YUY2", PixelLayout::Yuyv),
        ("image/jpeg", PixelLayout::Mjpeg),
        ("NV12", PixelLayout::Nv12),
        ("format=RGB", PixelLayout::Rgb24),
        ("format=(string)RGB", PixelLayout::Rgb24),
    ] {
        if scope.contains(needle) {
            caps.pixel_layouts.insert(layout);
        }
    }

    for line in scope.lines() {
        let width = int_after(line, "width=(int)");
        let height = int_after(line, "height=(int)");
        if let (Some(width), Some(height)) = (width, height) {
            if width > 0 && height > 0 {
                caps.resolutions.insert(Resolution::new(width, height));
            }
        }
        caps.framerates.extend(gst_framerates(line));
    }
    caps.hardware_acceleration = mentions_accelerator(output);
    caps
}

fn mentions_accelerator(output: &str) -> bool {
    output.contains("vaapi") || output.contains("nvenc")
}

/// Slice of `output` covering the `Device found:` block that mentions `device`.
fn device_block<'a>(output: &'a str, device: &str) -> Option<&'a str> {
    const MARKER: &str = "Device found:";
    let starts: Vec<usize> = output.match_indices(MARKER).map(|(i, _)| i).collect();
    starts.iter().enumerate().find_map(|(n, &start)| {
        let end = starts.get(n + 1).copied().unwrap_or(output.len());
        let block = &output[start..end];
        block.contains(device).then_some(block)
    })
}

/// Every `WIDTHxHEIGHT` token in `text`.
fn scan_dimensions(text: &str) -> Vec<Resolution> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'x' {
            i += 1;
            continue;
        }
        let mut start = i;
        while start > 0 && bytes[start - 1].is_ascii_digit() {
            start -= 1;
        }
        let mut end = i + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let width = text[start..i].parse::<u32>().ok();
        let height = text[i + 1..end].parse::<u32>().ok();
        if let (Some(width), Some(height)) = (width, height) {
            if width > 0 && height > 0 {
                found.push(Resolution::new(width, height));
            }
        }
        i = end.max(i + 1);
    }
    found
}

fn int_after(line: &str, key: &str) -> Option<u32> {
    let rest = &line[line.find(key)? + key.len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Rates from `framerate=(fraction)30/1` or `framerate=(fraction){ 30/1, 15/1 }`.
fn gst_framerates(line: &str) -> Vec<u32> {
    const KEY: &str = "framerate=(fraction)";
    let Some(pos) = line.find(KEY) else {
        return Vec::new();
    };
    let rest = line[pos + KEY.len()..].trim_start();
    let list = match rest.strip_prefix('{') {
        Some(inner) => inner.split('}').next().unwrap_or(""),
        None => rest.split([',', ';']).next().unwrap_or(""),
    };

    list.split(',')
        .filter_map(|fraction| {
            let (num, den) = fraction.trim().split_once('/')?;
            let num: u32 = num.trim().parse().ok()?;
            let den: u32 = den.trim().parse().ok()?;
            (den > 0 && num >= den).then(|| (num + den / 2) / den)
        })
        .collect()
}
