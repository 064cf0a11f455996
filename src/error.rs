use thiserror::Error;

use crate::capture::BackendKind;
use crate::types::Codec;

/// Result alias used across the capture library.
pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

/// Errors raised by adapters, the factory and the capture service.
///
/// Call-time problems are returned directly. Anything that happens inside the
/// external process after launch is only delivered through the registered
/// error callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("capture already in progress")]
    AlreadyCapturing,

    #[error("{backend} adapter does not support codec {codec}")]
    UnsupportedCodec { backend: BackendKind, codec: Codec },

    #[error("invalid capture configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown adapter type: {0}")]
    UnknownBackend(String),

    #[error("no suitable video capture backend found")]
    NoBackend,

    #[error("capture service has no adapter yet")]
    NotReady,

    #[error("failed to launch {program}: {reason}")]
    Launch { program: String, reason: String },

    #[error("device configuration failed: {0}")]
    DeviceConfig(String),

    #[error("{program} exited with {status}")]
    ProcessExited { program: String, status: String },

    #[error("error reading capture stream: {0}")]
    Stream(String),

    #[error("capability probe failed: {0}")]
    Probe(String),
}

impl CaptureError {
    pub(crate) fn launch(program: &str, err: &std::io::Error) -> Self {
        CaptureError::Launch {
            program: program.to_string(),
            reason: err.to_string(),
        }
    }
}
