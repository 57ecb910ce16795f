use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

pub const FRAME_CONTENT_TYPE: &str = "image/jpeg";

/// How the detector stage went for the frame, recorded beside the pixels so
/// consumers do not have to read the overlay to know it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMarker {
    /// The detector ran; the payload is the number of boxes drawn.
    Detections(usize),
    /// No detector is configured for this camera.
    DetectionUnavailable,
    /// The detector failed on this frame.
    AnalysisError,
}

impl AnalysisMarker {
    /// Overlay text drawn in the top-left corner of the frame.
    pub fn caption(&self) -> Option<String> {
        match self {
            AnalysisMarker::Detections(0) => None,
            AnalysisMarker::Detections(n) => Some(format!("Detections: {n}")),
            AnalysisMarker::DetectionUnavailable => Some("Detection unavailable".to_string()),
            AnalysisMarker::AnalysisError => Some("Analysis error".to_string()),
        }
    }
}

/// One encoded, annotated frame as published by a camera worker.
///
/// Frames are immutable once built and travel as `Arc<Frame>`. The JPEG is a
/// `Bytes` handle, so every viewer of a camera reads the same buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: usize,
    /// Strictly increasing per camera, including across decoder reopens.
    pub sequence: u64,
    pub produced_at_millis: u64,
    pub width: u32,
    pub height: u32,
    pub marker: AnalysisMarker,
    /// JPEG bytes.
    pub data: Bytes,
}

impl Frame {
    pub fn new(
        camera_id: usize,
        sequence: u64,
        width: u32,
        height: u32,
        marker: AnalysisMarker,
        data: Vec<u8>,
    ) -> Self {
        Self {
            camera_id,
            sequence,
            produced_at_millis: now_millis(),
            width,
            height,
            marker,
            data: Bytes::from(data),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
