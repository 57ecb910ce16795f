// THEORY:
// This file is the main entry point for the `fieldwatch` library crate. It
// defines the public API consumed by the HTTP server crate and by tests.
//
// The primary export is the `SurveillancePipeline`: it owns the per-camera
// workers and hands out the two things consumers care about, frame
// subscriptions from the `BroadcastHub` and alerts from the `AlertStore`.
// The building blocks underneath (decoders, detectors, annotation) are public
// as well, so alternative backends and detectors can be plugged in through
// the `DecoderBackend` and `Detector` traits.

pub mod alerts;
pub mod annotate;
pub mod catalog;
pub mod config;
pub mod decoder;
pub mod detection;
pub mod error;
pub mod frame;
pub mod hub;
pub mod motion;
#[cfg(feature = "opencv")]
pub mod opencv_decoder;
pub mod pipeline;
pub mod worker;

pub use alerts::{Alert, AlertStore};
pub use catalog::{CameraSource, SourceCatalog};
pub use config::{LabelOverrides, PipelineConfig};
pub use decoder::{DecoderBackend, FrameDecoder, ReadOutcome, SourceMetadata, default_backend};
pub use detection::{BoundingBox, ClassCatalog, Detection, Detector, DetectorFactory, DetectorKind};
pub use error::{PipelineError, Result};
pub use frame::{AnalysisMarker, FRAME_CONTENT_TYPE, Frame};
pub use hub::{BroadcastHub, Subscription};
pub use motion::MotionDetector;
pub use pipeline::{CameraStatus, ReopenOutcome, SurveillancePipeline};
pub use worker::{CameraState, StallReason};
