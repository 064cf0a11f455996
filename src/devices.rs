//! Video device discovery.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::capture::{run_tool, BackendKind};
use crate::error::{CaptureError, Result};

/// Sorted `video*` nodes under `dir` (normally `/dev`).
pub fn list_video_devices(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CaptureError::Probe(format!("cannot list {}: {}", dir.display(), e)))?;

    let mut devices: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("video"))
        .map(|entry| entry.path())
        .collect();
    devices.sort();
    Ok(devices)
}

/// Pick a backend from a `v4l2-ctl --all` report.
///
/// Devices that encode on board go through the transcoder, MJPEG cameras are
/// read directly, anything else gets a pipeline.
pub fn recommend_backend(report: &str) -> BackendKind {
    if report.contains("H.264") || report.contains("H264") {
        BackendKind::TranscodeProcess
    } else if report.contains("MJPG") {
        BackendKind::DirectDevice
    } else {
        BackendKind::PipelineProcess
    }
}

/// Query `device` with the control utility and recommend a backend for it.
///
/// An unreadable device still gets a recommendation (the pipeline runner),
/// matching what an empty report would yield.
pub async fn inspect_device(control_bin: &str, device: &str) -> Result<BackendKind> {
    let args = vec!["--device".to_string(), device.to_string(), "--all".to_string()];
    let (status, stdout, stderr) = run_tool(control_bin, &args).await?;
    if !status.success() {
        debug!("{} could not query {}: {}", control_bin, device, stderr.trim());
    }
    Ok(recommend_backend(&stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommendation_follows_advertised_formats() {
        let encoder = "Format Video Capture:\n\tPixel Format      : 'H264' (H.264)\n";
        assert_eq!(recommend_backend(encoder), BackendKind::TranscodeProcess);

        let mjpeg = "Format Video Capture:\n\tPixel Format      : 'MJPG' (Motion-JPEG)\n";
        assert_eq!(recommend_backend(mjpeg), BackendKind::DirectDevice);

        let yuyv = "Format Video Capture:\n\tPixel Format      : 'YUYV' (YUYV 4:2:2)\n";
        assert_eq!(recommend_backend(yuyv), BackendKind::PipelineProcess);
        assert_eq!(recommend_backend(""), BackendKind::PipelineProcess);
    }

    #[test]
    fn lists_only_video_nodes_sorted() {
        let dir = std::env::temp_dir().join(format!("vidcap-devices-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["video2", "video0", "audio0", "video10"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        let found = list_video_devices(&dir).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["video0", "video10", "video2"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_is_a_probe_error() {
        let err = list_video_devices("/nonexistent/dev").unwrap_err();
        assert!(matches!(err, CaptureError::Probe(_)));
    }

    #[tokio::test]
    async fn unreadable_device_falls_back_to_pipeline() {
        let kind = inspect_device("false", "/dev/video0").await.unwrap();
        assert_eq!(kind, BackendKind::PipelineProcess);
    }
}
