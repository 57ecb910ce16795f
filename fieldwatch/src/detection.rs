// THEORY:
// The detector is an external capability. The pipeline only knows the narrow
// `Detector` trait: an image goes in, labeled and scored boxes come out, and
// the call may fail. Whether a camera has a detector at all is configuration,
// not an error, which is why workers hold an `Option<Box<dyn Detector>>`.
//
// Everything that happens between raw inference and alerting lives in
// `triage`, in a fixed order:
// 1.  **Relabel**: the per-camera override table replaces the raw label.
// 2.  **Class filter**: in strict mode, labels missing from the class catalog
//     are dropped.
// 3.  **Display threshold**: boxes at or below it are discarded.
// 4.  **Alert threshold**: boxes strictly above it are also marked as alerting.
// Before any of that, boxes with non-finite coordinates are dropped and the
// rest are clamped to the frame.
// Keeping this in one function is what lets relabeling be configuration rather
// than branching on camera ids inside the inference code.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;

use crate::catalog::CameraSource;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::motion::MotionDetector;

/// Axis-aligned box in pixel coordinates of the (possibly resized) frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn is_finite(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite())
    }

    /// The box limited to the pixel grid of a `width` x `height` frame.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        Self {
            x1: self.x1.clamp(0.0, max_x),
            y1: self.y1.clamp(0.0, max_y),
            x2: self.x2.clamp(0.0, max_x),
            y2: self.y2.clamp(0.0, max_y),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bounding_box: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bounding_box,
        }
    }
}

/// Common interface for object and anomaly detectors
pub trait Detector: Send {
    /// Runs inference on one frame. Called from the blocking pool.
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;

    /// Detector name (for logging)
    fn name(&self) -> &str;
}

/// Builds the detector a camera worker will own, or `None` for no detection.
pub type DetectorFactory = Arc<dyn Fn(&CameraSource) -> Option<Box<dyn Detector>> + Send + Sync>;

/// Built-in detector choices selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    None,
    Motion,
}

impl DetectorKind {
    pub fn create(&self, _source: &CameraSource) -> Option<Box<dyn Detector>> {
        match self {
            DetectorKind::None => None,
            DetectorKind::Motion => Some(Box::new(MotionDetector::default())),
        }
    }

    pub fn factory(self) -> DetectorFactory {
        Arc::new(move |source: &CameraSource| self.create(source))
    }
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "" => Ok(DetectorKind::None),
            "motion" => Ok(DetectorKind::Motion),
            other => Err(format!("unknown detector `{other}` (expected `motion` or `none`)")),
        }
    }
}

/// Known detection classes and the alert message each one raises.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassCatalog {
    messages: BTreeMap<String, String>,
}

impl Default for ClassCatalog {
    fn default() -> Self {
        [
            ("person", "Human Detected"),
            ("cow", "Cow Detected"),
            ("sheep", "Sheep Detected"),
            ("horse", "Horse Detected"),
            ("dog", "Dog Detected"),
            ("cat", "Cat Detected"),
            ("bird", "Bird Detected"),
            ("car", "Vehicle Detected"),
            ("truck", "Truck Detected"),
            ("bicycle", "Bicycle Detected"),
            ("goat", "Goat Detected"),
            ("pig", "Pig Detected"),
            ("motion", "Motion Detected"),
        ]
        .into_iter()
        .collect()
    }
}

impl<L: Into<String>, M: Into<String>> FromIterator<(L, M)> for ClassCatalog {
    fn from_iter<T: IntoIterator<Item = (L, M)>>(iter: T) -> Self {
        Self {
            messages: iter
                .into_iter()
                .map(|(label, message)| (label.into(), message.into()))
                .collect(),
        }
    }
}

impl ClassCatalog {
    pub fn contains(&self, label: &str) -> bool {
        self.messages.contains_key(label)
    }

    /// Alert message for `label`, falling back to "<Label> Detected".
    pub fn message_for(&self, label: &str) -> String {
        if let Some(message) = self.messages.get(label) {
            return message.clone();
        }
        let mut chars = label.chars();
        match chars.next() {
            Some(first) => format!("{}{} Detected", first.to_uppercase(), chars.as_str()),
            None => "Object Detected".to_string(),
        }
    }
}

/// Detections of one frame after relabeling and thresholding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Triage {
    /// Everything above the display threshold, to be drawn.
    pub displayed: Vec<Detection>,
    /// Indices into `displayed` of the detections above the alert threshold.
    pub alerting: Vec<usize>,
}

impl Triage {
    pub fn alerts(&self) -> impl Iterator<Item = &Detection> {
        self.alerting.iter().map(|&i| &self.displayed[i])
    }
}

pub fn triage(
    raw: Vec<Detection>,
    frame_size: (u32, u32),
    camera_id: usize,
    config: &PipelineConfig,
    classes: &ClassCatalog,
) -> Triage {
    let (width, height) = frame_size;
    let mut result = Triage::default();
    for mut detection in raw {
        if !detection.bounding_box.is_finite() {
            tracing::debug!(camera_id, label = %detection.label, "Dropping detection with non-finite box");
            continue;
        }
        detection.bounding_box = detection.bounding_box.clamped(width, height);
        if let Some(forced) = config.label_overrides.forced_label(camera_id) {
            detection.label = forced.to_string();
        }
        if config.strict_classes && !classes.contains(&detection.label) {
            continue;
        }
        if detection.confidence <= config.display_threshold {
            continue;
        }
        if detection.confidence > config.alert_threshold {
            result.alerting.push(result.displayed.len());
        }
        result.displayed.push(detection);
    }
    result
}
