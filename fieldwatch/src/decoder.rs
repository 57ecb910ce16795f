//! Decoder abstraction.
//!
//! A `FrameDecoder` is a single open video source. It is `Send` so it can be
//! moved onto the blocking pool for a cycle, but it is never shared: exactly
//! one camera worker owns it and issues one read at a time.

use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use image::imageops::{self, FilterType};

use crate::catalog::CameraSource;
use crate::error::{PipelineError, Result};

/// Result of a single read from a decoder.
pub enum ReadOutcome {
    Frame(RgbImage),
    EndOfStream,
}

/// Diagnostic metadata reported when a source is probed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
}

/// An open video source.
pub trait FrameDecoder: Send {
    /// Reads the next frame. Decode errors are returned as `DecodeFailure`.
    fn read(&mut self) -> Result<ReadOutcome>;

    /// Seeks back to the first frame.
    fn rewind(&mut self) -> Result<()>;

    /// Releases the underlying handle. Reads after this report end of stream.
    fn release(&mut self) {}
}

/// Opens and probes video sources.
pub trait DecoderBackend: Send + Sync {
    /// Backend name (for logging)
    fn name(&self) -> &str;

    fn probe(&self, path: &Path) -> Result<SourceMetadata>;

    fn open(&self, source: &CameraSource) -> Result<Box<dyn FrameDecoder>>;
}

/// The backend compiled into this build: OpenCV when the `opencv` feature is
/// enabled, otherwise one that refuses every source.
pub fn default_backend() -> Arc<dyn DecoderBackend> {
    #[cfg(feature = "opencv")]
    {
        Arc::new(crate::opencv_decoder::OpenCvBackend)
    }
    #[cfg(not(feature = "opencv"))]
    {
        Arc::new(UnsupportedBackend)
    }
}

/// Stand-in used when no video backend is compiled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBackend;

impl DecoderBackend for UnsupportedBackend {
    fn name(&self) -> &str {
        "unsupported"
    }

    fn probe(&self, path: &Path) -> Result<SourceMetadata> {
        Err(PipelineError::unopenable(
            path.display().to_string(),
            "built without the `opencv` feature",
        ))
    }

    fn open(&self, source: &CameraSource) -> Result<Box<dyn FrameDecoder>> {
        Err(PipelineError::unopenable(
            source.path.display().to_string(),
            "built without the `opencv` feature",
        ))
    }
}

/// Downscales `frame` to `max_width` keeping its aspect ratio. Narrower frames
/// are returned untouched. Detection and annotation both run on the result, so
/// box coordinates always refer to the returned image.
pub fn fit_width(frame: RgbImage, max_width: u32) -> RgbImage {
    let (width, height) = frame.dimensions();
    if max_width == 0 || width <= max_width {
        return frame;
    }
    let scale = max_width as f64 / width as f64;
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    imageops::resize(&frame, max_width, new_height, FilterType::Triangle)
}
