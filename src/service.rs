//! Single-adapter facade handed to application code.
//!
//! The service hides which backend is in use. It may be created before a
//! backend has been chosen (see [`CaptureService::auto_detect`]); until then
//! every operation that needs an adapter fails with
//! [`CaptureError::NotReady`].

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};

use crate::capture::{BackendKind, CaptureAdapter, CaptureStatus, ErrorCallback, FrameCallback};
use crate::config::Settings;
use crate::error::{CaptureError, Result};
use crate::factory::{AdapterFactory, ToolProbe, WhichProbe};
use crate::types::{CaptureConfig, Codec, DeviceCapabilities, FrameData};

type AdapterSlot = Arc<AsyncMutex<Option<Box<dyn CaptureAdapter>>>>;

#[derive(Default)]
struct Listeners {
    on_frame: Mutex<Option<FrameCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl Listeners {
    fn frame(&self, frame: FrameData) {
        let callback = self
            .on_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(cb) = callback {
            cb(frame);
        }
    }

    fn error(&self, err: CaptureError) {
        error!("Capture error: {}", err);
        let callback = self
            .on_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(cb) = callback {
            cb(err);
        }
    }
}

pub struct CaptureService {
    adapter: AdapterSlot,
    /// Status handle of the installed adapter, readable while the adapter
    /// lock is held elsewhere.
    status: Arc<Mutex<Option<CaptureStatus>>>,
    listeners: Arc<Listeners>,
}

impl CaptureService {
    /// Service over a freshly built adapter of `kind`.
    pub fn new(kind: BackendKind, settings: &Settings) -> Self {
        Self::with_adapter(AdapterFactory::create_adapter(kind, settings))
    }

    pub fn with_adapter(adapter: Box<dyn CaptureAdapter>) -> Self {
        Self {
            status: Arc::new(Mutex::new(Some(adapter.status()))),
            adapter: Arc::new(AsyncMutex::new(Some(adapter))),
            listeners: Arc::new(Listeners::default()),
        }
    }

    fn without_adapter() -> Self {
        Self {
            adapter: Arc::new(AsyncMutex::new(None)),
            status: Arc::new(Mutex::new(None)),
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Service whose backend is chosen in the background by probing `PATH`.
    ///
    /// Returns immediately; [`Self::has_adapter`] turns true once detection
    /// succeeds. If nothing is found the error callback receives
    /// [`CaptureError::NoBackend`]. Must be called inside a tokio runtime.
    pub fn auto_detect(settings: Settings) -> Self {
        Self::auto_detect_with(settings, Arc::new(WhichProbe))
    }

    /// [`Self::auto_detect`] with a custom presence check.
    pub fn auto_detect_with(settings: Settings, probe: Arc<dyn ToolProbe>) -> Self {
        let service = Self::without_adapter();

        let slot = Arc::clone(&service.adapter);
        let status = Arc::clone(&service.status);
        let listeners = Arc::clone(&service.listeners);
        tokio::spawn(async move {
            match AdapterFactory::detect_best_adapter(&settings, probe.as_ref()).await {
                Ok(kind) => {
                    let adapter = AdapterFactory::create_adapter(kind, &settings);
                    let handle = adapter.status();
                    *slot.lock().await = Some(adapter);
                    *status.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                }
                Err(err) => listeners.error(err),
            }
        });
        service
    }

    /// Run detection to completion and build the service around the result.
    pub async fn detect(settings: &Settings, probe: &dyn ToolProbe) -> Result<Self> {
        let kind = AdapterFactory::detect_best_adapter(settings, probe).await?;
        Ok(Self::new(kind, settings))
    }

    pub async fn has_adapter(&self) -> bool {
        self.adapter.lock().await.is_some()
    }

    /// Backend in use, once chosen.
    pub async fn backend(&self) -> Option<BackendKind> {
        self.adapter.lock().await.as_ref().map(|a| a.kind())
    }

    /// Replace the frame callback. Takes effect for frames delivered after
    /// the call, including those of a running capture.
    pub fn on_frame(&self, callback: impl Fn(FrameData) + Send + Sync + 'static) {
        *self
            .listeners
            .on_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Replace the error callback. Errors are logged whether or not one is set.
    pub fn on_error(&self, callback: impl Fn(CaptureError) + Send + Sync + 'static) {
        *self
            .listeners
            .on_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    pub async fn start_capture(&self, config: CaptureConfig) -> Result<()> {
        let mut guard = self.adapter.lock().await;
        let adapter = guard.as_mut().ok_or(CaptureError::NotReady)?;

        let listeners = Arc::clone(&self.listeners);
        adapter.on_frame(Arc::new(move |frame: FrameData| listeners.frame(frame)));
        let listeners = Arc::clone(&self.listeners);
        adapter.on_error(Arc::new(move |err: CaptureError| listeners.error(err)));

        info!("Starting {} capture on {}", adapter.kind(), config.device);
        adapter.start_capture(config).await
    }

    /// Stop the running capture. A no-op without an adapter or session.
    pub async fn stop_capture(&self) {
        if let Some(adapter) = self.adapter.lock().await.as_mut() {
            adapter.stop_capture().await;
        }
    }

    pub async fn set_codec(&self, codec: Codec) -> Result<()> {
        let mut guard = self.adapter.lock().await;
        let adapter = guard.as_mut().ok_or(CaptureError::NotReady)?;
        adapter.set_codec(codec).await
    }

    pub async fn set_resolution(&self, width: u32, height: u32) -> Result<()> {
        let mut guard = self.adapter.lock().await;
        let adapter = guard.as_mut().ok_or(CaptureError::NotReady)?;
        adapter.set_resolution(width, height).await
    }

    /// Never waits on a start, stop or capability query in flight.
    pub fn is_capturing(&self) -> bool {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(CaptureStatus::is_capturing)
    }

    /// The adapter is locked only to build the query; the tool itself runs
    /// unlocked, so a slow query does not hold up `stop_capture`.
    pub async fn get_capabilities(&self) -> Result<DeviceCapabilities> {
        let query = self
            .adapter
            .lock()
            .await
            .as_ref()
            .ok_or(CaptureError::NotReady)?
            .capability_query();
        query.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Nothing;

    #[async_trait]
    impl ToolProbe for Nothing {
        async fn is_available(&self, _program: &str) -> bool {
            false
        }
    }

    struct Only(&'static str);

    #[async_trait]
    impl ToolProbe for Only {
        async fn is_available(&self, program: &str) -> bool {
            program == self.0
        }
    }

    #[tokio::test]
    async fn operations_before_detection_are_not_ready() {
        let service = CaptureService::without_adapter();
        assert!(!service.has_adapter().await);
        assert!(!service.is_capturing());
        service.stop_capture().await;

        let config = CaptureConfig::new("/dev/video0", 640, 480, 30);
        assert_eq!(service.start_capture(config).await, Err(CaptureError::NotReady));
        assert_eq!(service.set_codec(Codec::H264).await, Err(CaptureError::NotReady));
        assert_eq!(
            service.get_capabilities().await.unwrap_err(),
            CaptureError::NotReady
        );
    }

    #[tokio::test]
    async fn background_detection_installs_adapter() {
        let service =
            CaptureService::auto_detect_with(Settings::default(), Arc::new(Only("ffmpeg")));
        for _ in 0..100 {
            if service.has_adapter().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.backend().await, Some(BackendKind::TranscodeProcess));
    }

    #[tokio::test]
    async fn failed_detection_reports_no_backend() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));

        // The test runtime is single-threaded, so detection cannot run before
        // the callback below is registered.
        let service = CaptureService::auto_detect_with(Settings::default(), Arc::new(Nothing));
        service.on_error(move |err| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(err);
            }
        });

        let err = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(err, CaptureError::NoBackend);
        assert!(!service.has_adapter().await);
    }

    #[tokio::test]
    async fn awaited_detection() {
        let service = CaptureService::detect(&Settings::default(), &Only("v4l2-ctl"))
            .await
            .unwrap();
        assert_eq!(service.backend().await, Some(BackendKind::DirectDevice));

        let err = CaptureService::detect(&Settings::default(), &Nothing)
            .await
            .err()
            .unwrap();
        assert_eq!(err, CaptureError::NoBackend);
    }
}
