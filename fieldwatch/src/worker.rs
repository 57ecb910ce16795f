// THEORY:
// A `CameraWorker` is the single owner of one camera's decoder and detector.
// Nothing else ever reads from the decoder, so viewers can come and go without
// any effect on decoding.
//
// Key architectural principles:
// 1.  **Exclusive Ownership Across Threads**: Decode, inference, annotation
//     and encoding are blocking work. Each cycle moves the whole worker onto
//     the blocking pool and gets it back when the cycle completes, so exactly
//     one read is ever in flight and no lock guards the decoder.
// 2.  **Fixed Cadence**: Between two cycles the worker sleeps a fixed delay,
//     independent of how long the cycle took and of how many viewers exist.
// 3.  **Contained Failures**: Inference and encoding failures affect one frame.
//     Only the decoder can stall a camera, and only after it fails twice in a
//     row: two failed opens, or a failed read right after a rewind.
// 4.  **Observable Lifecycle**: `Idle -> Running -> {Stalled, Stopped}` is
//     published on a `watch` channel. A stalled or stopped worker closes its
//     hub channel, which is what ends the viewers' streams.

use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;
use tokio::sync::watch;

use crate::alerts::{Alert, AlertStore};
use crate::annotate::{annotate, encode_jpeg};
use crate::catalog::CameraSource;
use crate::config::PipelineConfig;
use crate::decoder::{DecoderBackend, FrameDecoder, ReadOutcome, fit_width};
use crate::detection::{ClassCatalog, Detector, Triage, triage};
use crate::error::Result;
use crate::frame::{AnalysisMarker, Frame};
use crate::hub::BroadcastHub;

/// Why a camera stopped producing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StallReason {
    /// The source could not be opened on two consecutive attempts.
    OpenFailed,
    /// End of stream was reported again right after rewinding.
    RestartExhausted,
    /// A read failed right after rewinding.
    DecodeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Idle,
    Running,
    Stalled(StallReason),
    Stopped,
}

impl CameraState {
    pub fn label(&self) -> &'static str {
        match self {
            CameraState::Idle => "idle",
            CameraState::Running => "running",
            CameraState::Stalled(_) => "stalled",
            CameraState::Stopped => "stopped",
        }
    }

    pub fn stall_reason(&self) -> Option<StallReason> {
        match self {
            CameraState::Stalled(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn is_stalled(&self) -> bool {
        matches!(self, CameraState::Stalled(_))
    }
}

/// Shared, read-only collaborators of every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub backend: Arc<dyn DecoderBackend>,
    pub config: Arc<PipelineConfig>,
    pub classes: Arc<ClassCatalog>,
    pub hub: Arc<BroadcastHub>,
    pub alerts: Arc<AlertStore>,
}

enum CycleOutcome {
    Continue,
    Stall(StallReason),
}

pub struct CameraWorker {
    source: CameraSource,
    ctx: WorkerContext,
    decoder: Option<Box<dyn FrameDecoder>>,
    detector: Option<Box<dyn Detector>>,
    state: Arc<watch::Sender<CameraState>>,
    next_sequence: u64,
}

impl CameraWorker {
    pub fn new(
        source: CameraSource,
        ctx: WorkerContext,
        detector: Option<Box<dyn Detector>>,
        state: Arc<watch::Sender<CameraState>>,
        first_sequence: u64,
    ) -> Self {
        Self {
            source,
            ctx,
            decoder: None,
            detector,
            state,
            next_sequence: first_sequence,
        }
    }

    pub fn camera_id(&self) -> usize {
        self.source.id
    }

    /// Runs cycles until the camera stalls or `shutdown` fires, returning the
    /// terminal state. A dropped shutdown sender counts as shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> CameraState {
        let camera_id = self.source.id;
        let cadence = self.ctx.config.cycle_delay;
        let hub = Arc::clone(&self.ctx.hub);
        let state = Arc::clone(&self.state);

        tracing::info!(
            camera_id,
            name = %self.source.name,
            detector = self.detector.as_ref().map(|d| d.name()).unwrap_or("none"),
            "Camera worker started"
        );

        let mut worker = self;
        loop {
            if *shutdown.borrow() {
                return worker.stop();
            }

            let joined = tokio::task::spawn_blocking(move || {
                let outcome = worker.cycle();
                (worker, outcome)
            })
            .await;

            let outcome;
            (worker, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // The worker and its decoder were lost with the panicked cycle.
                    tracing::error!(camera_id, error = %e, "Camera cycle panicked");
                    let stalled = CameraState::Stalled(StallReason::DecodeError);
                    hub.close(camera_id);
                    state.send_replace(stalled);
                    return stalled;
                }
            };

            if let CycleOutcome::Stall(reason) = outcome {
                return worker.stall(reason);
            }

            tokio::select! {
                _ = tokio::time::sleep(cadence) => {}
                _ = shutdown.changed() => return worker.stop(),
            }
        }
    }

    fn cycle(&mut self) -> CycleOutcome {
        if self.decoder.is_none() {
            match self.open_decoder() {
                Ok(decoder) => {
                    self.decoder = Some(decoder);
                    self.state.send_replace(CameraState::Running);
                    tracing::info!(camera_id = self.source.id, "Video source opened");
                }
                Err(e) => {
                    tracing::error!(camera_id = self.source.id, error = %e, "Video source failed to open twice");
                    return CycleOutcome::Stall(StallReason::OpenFailed);
                }
            }
        }

        match self.read_frame() {
            Ok(image) => {
                self.process(image);
                CycleOutcome::Continue
            }
            Err(reason) => CycleOutcome::Stall(reason),
        }
    }

    fn open_decoder(&self) -> Result<Box<dyn FrameDecoder>> {
        self.ctx.backend.open(&self.source).or_else(|e| {
            tracing::warn!(camera_id = self.source.id, error = %e, "Failed to open video source, retrying");
            self.ctx.backend.open(&self.source)
        })
    }

    /// Reads one frame, rewinding and retrying exactly once on end of stream
    /// or a read error.
    fn read_frame(&mut self) -> std::result::Result<RgbImage, StallReason> {
        let camera_id = self.source.id;
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(StallReason::OpenFailed);
        };

        match decoder.read() {
            Ok(ReadOutcome::Frame(image)) => return Ok(image),
            Ok(ReadOutcome::EndOfStream) => {
                tracing::debug!(camera_id, "End of stream, rewinding");
            }
            Err(e) => {
                tracing::warn!(camera_id, error = %e, "Read failed, rewinding");
            }
        }

        if let Err(e) = decoder.rewind() {
            tracing::warn!(camera_id, error = %e, "Rewind failed");
        }

        match decoder.read() {
            Ok(ReadOutcome::Frame(image)) => Ok(image),
            Ok(ReadOutcome::EndOfStream) => {
                tracing::error!(camera_id, "End of stream again after rewind");
                Err(StallReason::RestartExhausted)
            }
            Err(e) => {
                tracing::error!(camera_id, error = %e, "Read failed again after rewind");
                Err(StallReason::DecodeError)
            }
        }
    }

    fn process(&mut self, image: RgbImage) {
        let camera_id = self.source.id;
        let config = &self.ctx.config;
        let classes = &self.ctx.classes;
        let mut image = fit_width(image, config.max_frame_width);

        let (marker, triaged) = match self.detector.as_mut() {
            None => (AnalysisMarker::DetectionUnavailable, Triage::default()),
            Some(detector) => match detector.infer(&image) {
                Ok(raw) => {
                    let triaged = triage(raw, image.dimensions(), camera_id, config, classes);
                    (AnalysisMarker::Detections(triaged.displayed.len()), triaged)
                }
                Err(e) => {
                    tracing::warn!(camera_id, detector = detector.name(), error = %e, "Inference failed");
                    (AnalysisMarker::AnalysisError, Triage::default())
                }
            },
        };

        let alerts: Vec<Alert> = triaged
            .alerts()
            .map(|d| Alert::from_detection(camera_id, d, classes))
            .collect();

        annotate(&mut image, &self.source, &triaged.displayed, marker);
        match encode_jpeg(&image, config.jpeg_quality) {
            Ok(bytes) => {
                let (width, height) = image.dimensions();
                let frame = Frame::new(camera_id, self.next_sequence, width, height, marker, bytes);
                self.next_sequence += 1;
                if let Err(e) = self.ctx.hub.publish(frame) {
                    tracing::warn!(camera_id, error = %e, "Frame not published");
                }
            }
            Err(e) => {
                tracing::warn!(camera_id, error = %e, "Frame skipped");
            }
        }

        for alert in alerts {
            tracing::info!(
                camera_id,
                kind = %alert.kind,
                confidence = alert.confidence,
                "Alert raised"
            );
            self.ctx.alerts.record(alert);
        }
    }

    fn release_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.release();
        }
    }

    fn stall(mut self, reason: StallReason) -> CameraState {
        self.release_decoder();
        // Close before publishing the state: a reopen triggered by the new
        // state must find the channel already closed.
        self.ctx.hub.close(self.source.id);
        let stalled = CameraState::Stalled(reason);
        self.state.send_replace(stalled);
        tracing::warn!(camera_id = self.source.id, reason = ?reason, "Camera stalled");
        stalled
    }

    fn stop(mut self) -> CameraState {
        self.release_decoder();
        self.ctx.hub.close(self.source.id);
        self.state.send_replace(CameraState::Stopped);
        tracing::info!(camera_id = self.source.id, "Camera worker stopped");
        CameraState::Stopped
    }
}
