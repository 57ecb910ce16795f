//! Error taxonomy for the surveillance pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by the catalog, decoders, detectors and the encode step.
///
/// Only `Unopenable` and `DecodeFailure` ever change a camera's state; the
/// other per-frame failures are absorbed inside a single worker cycle.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no such camera: {0}")]
    SourceUnavailable(usize),

    #[error("cannot open video source {path}: {reason}")]
    Unopenable { path: String, reason: String },

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("inference failure: {0}")]
    InferenceFailure(String),

    #[error("encode failure: {0}")]
    EncodeFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn unopenable<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Self::Unopenable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::DecodeFailure(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::InferenceFailure(msg.into())
    }

    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::EncodeFailure(msg.into())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        Self::EncodeFailure(err.to_string())
    }
}
