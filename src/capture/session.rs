//! Per-adapter session state shared between the adapter and its reader task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use tokio::process::Command;

use super::process::{ProcessHandle, StreamDecoder};
use crate::error::{CaptureError, Result};
use crate::types::{CaptureConfig, FrameData, FrameFormat};

/// Receives every delivered frame.
pub type FrameCallback = Arc<dyn Fn(FrameData) + Send + Sync>;

/// Receives errors raised after launch.
pub type ErrorCallback = Arc<dyn Fn(CaptureError) + Send + Sync>;

/// Low bit of [`Shared::state`]: a capture process is running.
const CAPTURING: u64 = 1;

/// State reachable from both the adapter and the background reader.
#[derive(Default)]
struct Shared {
    /// Session epoch in the upper bits, [`CAPTURING`] in the low bit. Kept in
    /// one word so a stale reader cannot clear the flag of a newer session.
    /// The epoch is bumped on every start and stop; deliveries from older
    /// epochs are dropped.
    state: AtomicU64,
    on_frame: Mutex<Option<FrameCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl Shared {
    fn is_capturing(&self) -> bool {
        self.state.load(Ordering::Acquire) & CAPTURING != 0
    }

    fn epoch(&self) -> u64 {
        self.state.load(Ordering::Acquire) >> 1
    }

    fn frame_callback(&self) -> Option<FrameCallback> {
        self.on_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn report_error(&self, err: CaptureError) {
        let callback = self
            .on_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(cb) => cb(err),
            None => tracing::debug!("no error callback registered, dropping: {}", err),
        }
    }
}

/// Cloneable view of whether an adapter's capture is running. Reading it
/// never touches the adapter itself.
#[derive(Clone)]
pub struct CaptureStatus {
    shared: Arc<Shared>,
}

impl CaptureStatus {
    pub fn is_capturing(&self) -> bool {
        self.shared.is_capturing()
    }
}

pub(crate) struct Session {
    shared: Arc<Shared>,
    config: Option<CaptureConfig>,
    process: Option<ProcessHandle>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            config: None,
            process: None,
        }
    }

    pub(crate) fn is_capturing(&self) -> bool {
        self.shared.is_capturing()
    }

    pub(crate) fn status(&self) -> CaptureStatus {
        CaptureStatus {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn config(&self) -> Option<&CaptureConfig> {
        self.config.as_ref()
    }

    /// Device of the applied configuration, `fallback` before any.
    pub(crate) fn device_or(&self, fallback: &str) -> String {
        self.config
            .as_ref()
            .map_or(fallback, |c| c.device.as_str())
            .to_string()
    }

    pub(crate) fn set_on_frame(&self, callback: FrameCallback) {
        *self
            .shared
            .on_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub(crate) fn set_on_error(&self, callback: ErrorCallback) {
        *self
            .shared
            .on_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub(crate) fn ensure_idle(&self) -> Result<()> {
        if self.is_capturing() {
            return Err(CaptureError::AlreadyCapturing);
        }
        Ok(())
    }

    /// Record `config` as the active configuration and open a new epoch.
    pub(crate) fn begin(&mut self, config: &CaptureConfig) -> Result<Emitter> {
        self.ensure_idle()?;
        self.config = Some(config.clone());
        let epoch = (self.shared.state.fetch_add(2, Ordering::AcqRel) >> 1) + 1;
        Ok(Emitter {
            shared: Arc::clone(&self.shared),
            epoch,
            started: Instant::now(),
            width: config.width,
            height: config.height,
            delivered: 0,
        })
    }

    /// Spawn the capture process and mark the session as capturing.
    pub(crate) fn launch(
        &mut self,
        command: Command,
        program: &str,
        decoder: StreamDecoder,
        emitter: Emitter,
    ) -> Result<()> {
        // Set before the reader exists so an early exit can clear it again.
        self.shared.state.fetch_or(CAPTURING, Ordering::AcqRel);
        match ProcessHandle::spawn(command, program, decoder, emitter) {
            Ok(handle) => {
                self.process = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.state.fetch_and(!CAPTURING, Ordering::AcqRel);
                Err(self.fail(err))
            }
        }
    }

    /// Deliver a launch-time failure to the error callback and hand it back.
    pub(crate) fn fail(&self, err: CaptureError) -> CaptureError {
        self.shared.report_error(err.clone());
        err
    }

    /// Stop delivery and terminate the process. Returns whether a capture was
    /// running.
    pub(crate) fn end(&mut self) -> bool {
        let previous = self
            .shared
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                Some(((s >> 1) + 1) << 1)
            })
            .unwrap_or_else(|s| s);
        let was_capturing = previous & CAPTURING != 0;
        if let Some(process) = self.process.take() {
            process.terminate();
        }
        was_capturing
    }

    /// Apply `update` to the stored configuration, returning the new value.
    /// `None` when no configuration has been applied yet.
    pub(crate) fn update_config(
        &mut self,
        update: impl FnOnce(&mut CaptureConfig),
    ) -> Result<Option<CaptureConfig>> {
        let Some(current) = self.config.as_ref() else {
            return Ok(None);
        };
        let mut next = current.clone();
        update(&mut next);
        next.validate()?;
        self.config = Some(next.clone());
        Ok(Some(next))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.end() {
            tracing::debug!("capture session dropped while running, process terminated");
        }
    }
}

/// Delivery handle owned by the reader task of one session epoch.
pub(crate) struct Emitter {
    shared: Arc<Shared>,
    epoch: u64,
    started: Instant,
    width: u32,
    height: u32,
    delivered: u64,
}

impl Emitter {
    pub(crate) fn is_current(&self) -> bool {
        self.shared.epoch() == self.epoch
    }

    pub(crate) fn deliver(&mut self, data: Bytes, format: FrameFormat, keyframe: Option<bool>) {
        if !self.is_current() {
            return;
        }
        let frame = FrameData {
            data,
            timestamp_us: self.started.elapsed().as_micros() as u64,
            format,
            width: self.width,
            height: self.height,
            keyframe,
        };
        if let Some(cb) = self.shared.frame_callback() {
            cb(frame);
        }

        self.delivered += 1;
        if self.delivered % 300 == 0 {
            tracing::debug!("{} frames delivered", self.delivered);
        }
    }

    pub(crate) fn error(&self, err: CaptureError) {
        if self.is_current() {
            self.shared.report_error(err);
        }
    }

    /// The process is gone; flip the session back to idle. No effect once a
    /// newer epoch has begun.
    pub(crate) fn mark_idle(&self) {
        let running = (self.epoch << 1) | CAPTURING;
        let _ = self.shared.state.compare_exchange(
            running,
            running & !CAPTURING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered
    }
}
