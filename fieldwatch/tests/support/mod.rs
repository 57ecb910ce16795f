//! Scripted decoders and detectors shared by the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fieldwatch::{
    BoundingBox, CameraSource, DecoderBackend, Detection, Detector, DetectorFactory, Frame,
    FrameDecoder, PipelineConfig, PipelineError, ReadOutcome, Result, SourceCatalog,
    SourceMetadata, Subscription, SurveillancePipeline,
};
use image::RgbImage;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct FakeBackend {
    pub reads: Arc<AtomicUsize>,
    pub frames_per_pass: usize,
    pub rewind_restores: bool,
    pub openable: bool,
    pub read_delay: Duration,
}

impl FakeBackend {
    /// A source that never runs out of frames.
    pub fn endless() -> Self {
        Self {
            reads: Arc::new(AtomicUsize::new(0)),
            frames_per_pass: usize::MAX,
            rewind_restores: true,
            openable: true,
            read_delay: Duration::ZERO,
        }
    }

    /// An endless source whose every read blocks for `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            read_delay: delay,
            ..Self::endless()
        }
    }

    /// A source with `frames` frames that cannot be rewound.
    pub fn finite(frames: usize) -> Self {
        Self {
            frames_per_pass: frames,
            rewind_restores: false,
            ..Self::endless()
        }
    }

    pub fn unopenable() -> Self {
        Self {
            openable: false,
            ..Self::endless()
        }
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl DecoderBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn probe(&self, _path: &Path) -> Result<SourceMetadata> {
        Ok(SourceMetadata {
            width: 64,
            height: 48,
            fps: 20.0,
            frame_count: self.frames_per_pass as u64,
        })
    }

    fn open(&self, source: &CameraSource) -> Result<Box<dyn FrameDecoder>> {
        if !self.openable {
            return Err(PipelineError::unopenable(source.path.display().to_string(), "fake"));
        }
        Ok(Box::new(FakeDecoder {
            reads: Arc::clone(&self.reads),
            remaining: self.frames_per_pass,
            per_pass: self.frames_per_pass,
            rewind_restores: self.rewind_restores,
            read_delay: self.read_delay,
        }))
    }
}

struct FakeDecoder {
    reads: Arc<AtomicUsize>,
    remaining: usize,
    per_pass: usize,
    rewind_restores: bool,
    read_delay: Duration,
}

impl FrameDecoder for FakeDecoder {
    fn read(&mut self) -> Result<ReadOutcome> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }
        if self.remaining == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        self.remaining -= 1;
        Ok(ReadOutcome::Frame(RgbImage::from_pixel(64, 48, image::Rgb([30, 90, 30]))))
    }

    fn rewind(&mut self) -> Result<()> {
        if self.rewind_restores {
            self.remaining = self.per_pass;
        }
        Ok(())
    }
}

/// Reports the same detections on every frame.
pub struct FixedDetector(pub Vec<Detection>);

impl Detector for FixedDetector {
    fn infer(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

pub struct FailingDetector;

impl Detector for FailingDetector {
    fn infer(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        Err(PipelineError::inference("model crashed"))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

pub fn detection(label: &str, confidence: f32) -> Detection {
    Detection::new(label, confidence, BoundingBox::new(8.0, 8.0, 40.0, 36.0))
}

pub fn fixed(detections: Vec<Detection>) -> DetectorFactory {
    Arc::new(move |_source: &CameraSource| {
        Some(Box::new(FixedDetector(detections.clone())) as Box<dyn Detector>)
    })
}

pub fn failing() -> DetectorFactory {
    Arc::new(|_source: &CameraSource| Some(Box::new(FailingDetector) as Box<dyn Detector>))
}

pub fn no_detector() -> DetectorFactory {
    Arc::new(|_source: &CameraSource| -> Option<Box<dyn Detector>> { None })
}

pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        cycle_delay: Duration::from_millis(5),
        frame_channel_capacity: 16,
        ..Default::default()
    }
}

pub fn catalog(cameras: usize) -> SourceCatalog {
    SourceCatalog::from_sources((0..cameras).map(|i| CameraSource::new(i, format!("/videos/cam{i}.mp4"))))
}

pub fn pipeline(
    cameras: usize,
    backend: &FakeBackend,
    detectors: DetectorFactory,
    config: PipelineConfig,
) -> SurveillancePipeline {
    SurveillancePipeline::new(catalog(cameras), Arc::new(backend.clone()), detectors, config)
}

/// Next frame, failing the test if none arrives in time.
pub async fn next(sub: &mut Subscription) -> Arc<Frame> {
    tokio::time::timeout(WAIT, sub.next_frame())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended unexpectedly")
}
