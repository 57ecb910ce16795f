//! OpenCV `VideoCapture` backend, enabled with the `opencv` feature.

use std::path::Path;

use image::RgbImage;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};

use crate::catalog::CameraSource;
use crate::decoder::{DecoderBackend, FrameDecoder, ReadOutcome, SourceMetadata};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCvBackend;

fn open_capture(path: &Path) -> Result<VideoCapture> {
    let path_str = path.to_string_lossy();
    let cap = VideoCapture::from_file(&path_str, videoio::CAP_ANY)
        .map_err(|e| PipelineError::unopenable(path_str.to_string(), e.to_string()))?;
    let opened = cap
        .is_opened()
        .map_err(|e| PipelineError::unopenable(path_str.to_string(), e.to_string()))?;
    if !opened {
        return Err(PipelineError::unopenable(
            path_str.to_string(),
            "check file path and codecs",
        ));
    }
    Ok(cap)
}

impl DecoderBackend for OpenCvBackend {
    fn name(&self) -> &str {
        "opencv"
    }

    fn probe(&self, path: &Path) -> Result<SourceMetadata> {
        let mut cap = open_capture(path)?;
        let prop = |cap: &VideoCapture, id: i32| cap.get(id).unwrap_or(0.0);
        let meta = SourceMetadata {
            width: prop(&cap, videoio::CAP_PROP_FRAME_WIDTH) as u32,
            height: prop(&cap, videoio::CAP_PROP_FRAME_HEIGHT) as u32,
            fps: prop(&cap, videoio::CAP_PROP_FPS),
            frame_count: prop(&cap, videoio::CAP_PROP_FRAME_COUNT).max(0.0) as u64,
        };
        let _ = cap.release();
        Ok(meta)
    }

    fn open(&self, source: &CameraSource) -> Result<Box<dyn FrameDecoder>> {
        let cap = open_capture(&source.path)?;
        Ok(Box::new(OpenCvDecoder {
            cap,
            bgr: Mat::default(),
            rgb: Mat::default(),
        }))
    }
}

/// A single `VideoCapture` plus its reusable scratch matrices.
pub struct OpenCvDecoder {
    cap: VideoCapture,
    bgr: Mat,
    rgb: Mat,
}

impl OpenCvDecoder {
    fn to_rgb_image(&mut self) -> Result<RgbImage> {
        // OpenCV decodes to BGR; the rest of the pipeline works in RGB.
        imgproc::cvt_color(&self.bgr, &mut self.rgb, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|e| PipelineError::decode(e.to_string()))?;
        let width = self.rgb.cols() as u32;
        let height = self.rgb.rows() as u32;
        let bytes = self
            .rgb
            .data_bytes()
            .map_err(|e| PipelineError::decode(e.to_string()))?
            .to_vec();
        RgbImage::from_raw(width, height, bytes)
            .ok_or_else(|| PipelineError::decode("frame buffer does not match its dimensions"))
    }
}

impl FrameDecoder for OpenCvDecoder {
    fn read(&mut self) -> Result<ReadOutcome> {
        match self.cap.read(&mut self.bgr) {
            Ok(true) if !self.bgr.empty() => Ok(ReadOutcome::Frame(self.to_rgb_image()?)),
            Ok(_) => Ok(ReadOutcome::EndOfStream),
            Err(e) => Err(PipelineError::decode(e.to_string())),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.cap
            .set(videoio::CAP_PROP_POS_FRAMES, 0.0)
            .map(|_| ())
            .map_err(|e| PipelineError::decode(e.to_string()))
    }

    fn release(&mut self) {
        if let Err(e) = self.cap.release() {
            tracing::warn!(error = %e, "Failed to release video capture");
        }
    }
}
