use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};

use super::OutputSink;
use crate::types::{FrameData, FrameFormat, PixelLayout};

/// Saves the first uncompressed frame it sees as an image file.
pub struct SnapshotSink {
    path: PathBuf,
    saved: bool,
}

impl SnapshotSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            saved: false,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }
}

impl OutputSink for SnapshotSink {
    fn write_frame(&mut self, frame: &FrameData) -> Result<()> {
        if self.saved {
            return Ok(());
        }
        if let FrameFormat::Encoded(codec) = frame.format {
            tracing::debug!("Skipping {} unit, snapshots need raw frames", codec);
            return Ok(());
        }

        let image = frame_to_rgb(frame)?;
        image
            .save(&self.path)
            .with_context(|| format!("Failed to save snapshot to {}", self.path.display()))?;
        tracing::info!(
            "Snapshot {}x{} saved to {}",
            image.width(),
            image.height(),
            self.path.display()
        );
        self.saved = true;
        Ok(())
    }
}

/// Convert one uncompressed frame to RGB.
pub fn frame_to_rgb(frame: &FrameData) -> Result<RgbImage> {
    let FrameFormat::Pixel(layout) = frame.format else {
        bail!("cannot convert a coded unit to an image");
    };
    let (width, height) = (frame.width, frame.height);

    let expected = layout.frame_size(width, height);
    if !layout.is_variable_size() && frame.data.len() < expected {
        bail!(
            "{} frame of {}x{} needs {} bytes, got {}",
            layout,
            width,
            height,
            expected,
            frame.data.len()
        );
    }

    let image = match layout {
        PixelLayout::Mjpeg => image::load_from_memory(&frame.data)
            .context("Failed to decode MJPEG frame")?
            .to_rgb8(),
        PixelLayout::Rgb24 => RgbImage::from_raw(width, height, frame.data[..expected].to_vec())
            .context("RGB buffer does not match frame geometry")?,
        PixelLayout::Yuyv => yuyv_to_rgb(&frame.data, width, height),
        PixelLayout::Nv12 => nv12_to_rgb(&frame.data, width, height),
    };
    Ok(image)
}

/// Packed Y0 U Y1 V, one chroma pair per two pixels.
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> RgbImage {
    let stride = width as usize * 2;
    RgbImage::from_fn(width, height, |x, y| {
        let row = y as usize * stride;
        let pair = row + (x as usize / 2) * 4;
        let luma = if x % 2 == 0 { data[pair] } else { data[pair + 2] };
        // Odd widths leave the last pixel without a partner.
        let (u, v) = if pair + 3 < row + stride {
            (data[pair + 1], data[pair + 3])
        } else {
            (128, 128)
        };
        yuv_to_rgb(luma, u, v)
    })
}

/// Full-resolution Y plane followed by interleaved UV at quarter resolution.
fn nv12_to_rgb(data: &[u8], width: u32, height: u32) -> RgbImage {
    let (w, h) = (width as usize, height as usize);
    let uv_plane = &data[w * h..];
    let uv_stride = w.div_ceil(2) * 2;
    RgbImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let luma = data[y * w + x];
        let uv = (y / 2) * uv_stride + (x / 2) * 2;
        match (uv_plane.get(uv), uv_plane.get(uv + 1)) {
            (Some(&u), Some(&v)) => yuv_to_rgb(luma, u, v),
            _ => yuv_to_rgb(luma, 128, 128),
        }
    })
}

/// Inverse of the analog YUV transform used when producing YUYV output.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = (y + 1.140 * v).clamp(0.0, 255.0) as u8;
    let g = (y - 0.395 * u - 0.581 * v).clamp(0.0, 255.0) as u8;
    let b = (y + 2.032 * u).clamp(0.0, 255.0) as u8;

    Rgb([r, g, b])
}
