use std::path::PathBuf;
use thiserror::Error;

use crate::session::RequestId;

/// Boxed source error that can cross the execution-context thread boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the style-transfer pipeline.
///
/// Codec errors (`InvalidDimensions`, `InvalidTensorShape`, `InvalidPixelBuffer`)
/// are caller mistakes and are rejected before anything reaches the backend.
/// `ModelLoad` is fatal at startup. `SessionBusy` is misuse of the single-flight
/// contract. `Inference` is reported per request and leaves the session usable.
#[derive(Error, Debug)]
pub enum StyleError {
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid tensor shape: {shape:?} (expected [1, height, width, 3])")]
    InvalidTensorShape { shape: Vec<usize> },

    #[error("Invalid pixel buffer: {reason}")]
    InvalidPixelBuffer { reason: String },

    #[error("Model load error: {operation} failed")]
    ModelLoad {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Session busy: request {pending} has not been consumed")]
    SessionBusy { pending: RequestId },

    #[error("Inference error: request {request} failed")]
    Inference {
        request: RequestId,
        #[source]
        source: BoxError,
    },

    #[error("Session closed: the execution context is no longer running")]
    SessionClosed,

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Backend error: {operation} failed")]
    Backend {
        operation: String,
        #[source]
        source: BoxError,
    },
}

pub type Result<T> = std::result::Result<T, StyleError>;

impl StyleError {
    pub(crate) fn model_load(
        operation: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::ModelLoad {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Codec-level errors are rejected before submission and never retried.
    pub const fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimensions { .. }
                | Self::InvalidTensorShape { .. }
                | Self::InvalidPixelBuffer { .. }
                | Self::SessionBusy { .. }
        )
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that has context should construct `StyleError::FileSystem` directly
/// with the specific path and operation.
impl From<std::io::Error> for StyleError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for StyleError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// ONNX Runtime errors raised while a session is already loaded belong to the
/// backend run; load-time failures are mapped to `ModelLoad` at the call site.
impl From<ort::Error> for StyleError {
    fn from(err: ort::Error) -> Self {
        Self::Backend {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ndarray::ShapeError> for StyleError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Backend {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
