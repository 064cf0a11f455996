//! Adapter construction and backend auto-detection.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::capture::{
    BackendKind, CaptureAdapter, DirectDeviceAdapter, PipelineAdapter, TranscodeAdapter,
};
use crate::config::Settings;
use crate::error::{CaptureError, Result};

/// Answers whether an external tool can be launched.
#[async_trait]
pub trait ToolProbe: Send + Sync {
    async fn is_available(&self, program: &str) -> bool;
}

/// Looks tools up on `PATH` with `which`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhichProbe;

#[async_trait]
impl ToolProbe for WhichProbe {
    async fn is_available(&self, program: &str) -> bool {
        let status = Command::new("which")
            .arg(program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                debug!("which {} failed: {}", program, e);
                false
            }
        }
    }
}

pub struct AdapterFactory;

impl AdapterFactory {
    /// Build a fresh, idle adapter of `kind`.
    pub fn create_adapter(kind: BackendKind, settings: &Settings) -> Box<dyn CaptureAdapter> {
        let device = settings.default_device.clone();
        match kind {
            BackendKind::DirectDevice => Box::new(
                DirectDeviceAdapter::new(settings.direct.clone()).with_probe_device(device),
            ),
            BackendKind::TranscodeProcess => Box::new(
                TranscodeAdapter::new(settings.transcode.clone()).with_probe_device(device),
            ),
            BackendKind::PipelineProcess => Box::new(
                PipelineAdapter::new(settings.pipeline.clone()).with_probe_device(device),
            ),
        }
    }

    /// Like [`Self::create_adapter`], selecting the backend by name.
    pub fn create_adapter_named(name: &str, settings: &Settings) -> Result<Box<dyn CaptureAdapter>> {
        let kind: BackendKind = name.parse()?;
        Ok(Self::create_adapter(kind, settings))
    }

    /// The tool each backend cannot run without.
    pub fn required_tool(kind: BackendKind, settings: &Settings) -> &str {
        match kind {
            BackendKind::PipelineProcess => &settings.pipeline.launch_bin,
            BackendKind::TranscodeProcess => &settings.transcode.ffmpeg_bin,
            BackendKind::DirectDevice => &settings.direct.control_bin,
        }
    }

    /// First backend in [`BackendKind::PRIORITY`] whose tool is present.
    pub async fn detect_best_adapter(
        settings: &Settings,
        probe: &dyn ToolProbe,
    ) -> Result<BackendKind> {
        for kind in BackendKind::PRIORITY {
            let tool = Self::required_tool(kind, settings);
            if probe.is_available(tool).await {
                info!("Selected {} backend ({} found)", kind, tool);
                return Ok(kind);
            }
            debug!("{} not found, skipping {} backend", tool, kind);
        }
        Err(CaptureError::NoBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Reports the listed tools as present and records every query.
    struct StubProbe {
        present: HashSet<&'static str>,
        asked: Mutex<Vec<String>>,
    }

    impl StubProbe {
        fn with(present: &[&'static str]) -> Self {
            Self {
                present: present.iter().copied().collect(),
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ToolProbe for StubProbe {
        async fn is_available(&self, program: &str) -> bool {
            self.asked.lock().unwrap().push(program.to_string());
            self.present.contains(program)
        }
    }

    #[tokio::test]
    async fn pipeline_wins_when_everything_is_installed() {
        let probe = StubProbe::with(&["gst-launch-1.0", "ffmpeg", "v4l2-ctl"]);
        let kind = AdapterFactory::detect_best_adapter(&Settings::default(), &probe)
            .await
            .unwrap();
        assert_eq!(kind, BackendKind::PipelineProcess);
        assert_eq!(probe.asked.lock().unwrap().as_slice(), ["gst-launch-1.0"]);
    }

    #[tokio::test]
    async fn falls_back_in_priority_order() {
        let probe = StubProbe::with(&["ffmpeg", "v4l2-ctl"]);
        let kind = AdapterFactory::detect_best_adapter(&Settings::default(), &probe)
            .await
            .unwrap();
        assert_eq!(kind, BackendKind::TranscodeProcess);

        let probe = StubProbe::with(&["v4l2-ctl"]);
        let kind = AdapterFactory::detect_best_adapter(&Settings::default(), &probe)
            .await
            .unwrap();
        assert_eq!(kind, BackendKind::DirectDevice);
    }

    #[tokio::test]
    async fn nothing_installed_is_an_error() {
        let probe = StubProbe::with(&[]);
        let err = AdapterFactory::detect_best_adapter(&Settings::default(), &probe)
            .await
            .unwrap_err();
        assert_eq!(err, CaptureError::NoBackend);
        assert_eq!(probe.asked.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn overridden_tool_paths_are_probed() {
        let mut settings = Settings::default();
        settings.transcode.ffmpeg_bin = "/opt/ffmpeg/bin/ffmpeg".into();
        let probe = StubProbe::with(&["/opt/ffmpeg/bin/ffmpeg"]);
        let kind = AdapterFactory::detect_best_adapter(&settings, &probe)
            .await
            .unwrap();
        assert_eq!(kind, BackendKind::TranscodeProcess);
    }

    #[test]
    fn creates_idle_adapters_of_each_kind() {
        let settings = Settings::default();
        for kind in BackendKind::PRIORITY {
            let adapter = AdapterFactory::create_adapter(kind, &settings);
            assert_eq!(adapter.kind(), kind);
            assert!(!adapter.is_capturing());
            assert!(adapter.config().is_none());
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = AdapterFactory::create_adapter_named("unknown", &Settings::default())
            .err()
            .unwrap();
        assert_eq!(err, CaptureError::UnknownBackend("unknown".into()));

        let adapter = AdapterFactory::create_adapter_named("ffmpeg", &Settings::default()).unwrap();
        assert_eq!(adapter.kind(), BackendKind::TranscodeProcess);
    }

    #[tokio::test]
    async fn which_finds_the_shell() {
        assert!(WhichProbe.is_available("sh").await);
        assert!(!WhichProbe.is_available("definitely-not-a-real-tool-xyz").await);
    }
}
