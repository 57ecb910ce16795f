// THEORY:
// Every tunable of the pipeline lives here so the worker, the hub and the alert
// store agree on one set of numbers. The defaults mirror the deployed farm
// setup: a 50ms cadence, a 1280px width bound, a 0.3 display threshold and a
// 0.5 alert threshold.
//
// The `LabelOverrides` table is the single place where deployment-specific
// relabeling happens. Some feeds are known to be misclassified by the detector
// (a goat pen reported as "sheep", say); rather than branching on camera ids in
// the detection code, the table is consulted once, right after inference and
// before any threshold is applied.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DISPLAY_THRESHOLD: f32 = 0.3;
pub const ALERT_THRESHOLD: f32 = 0.5;
pub const CYCLE_DELAY: Duration = Duration::from_millis(50);
pub const MAX_FRAME_WIDTH: u32 = 1280;
pub const JPEG_QUALITY: u8 = 85;
pub const ALERT_CAPACITY: usize = 10;

/// Configuration for the pipeline, shared read-only by every camera worker.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Detections at or below this confidence are neither drawn nor alerted.
    pub display_threshold: f32,
    /// Detections strictly above this confidence raise one alert each.
    pub alert_threshold: f32,
    /// Fixed pause between two worker cycles, independent of decode latency.
    pub cycle_delay: Duration,
    /// Frames wider than this are downscaled before detection and annotation.
    pub max_frame_width: u32,
    pub jpeg_quality: u8,
    /// Per-camera frame channel depth. A viewer lagging further behind skips frames.
    pub frame_channel_capacity: usize,
    /// Number of alerts retained for polling clients.
    pub alert_capacity: usize,
    /// Depth of the real-time alert channel.
    pub alert_channel_capacity: usize,
    pub label_overrides: LabelOverrides,
    /// Discard detections whose label has no entry in the class catalog. On by default.
    pub strict_classes: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            display_threshold: DISPLAY_THRESHOLD,
            alert_threshold: ALERT_THRESHOLD,
            cycle_delay: CYCLE_DELAY,
            max_frame_width: MAX_FRAME_WIDTH,
            jpeg_quality: JPEG_QUALITY,
            frame_channel_capacity: 2,
            alert_capacity: ALERT_CAPACITY,
            alert_channel_capacity: 64,
            label_overrides: LabelOverrides::default(),
            strict_classes: true,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseOverrideError {
    #[error("override entry `{0}` is not of the form <camera_id>=<label>")]
    Malformed(String),
    #[error("override entry `{0}` has a non-numeric camera id")]
    BadCameraId(String),
    #[error("override entry `{0}` has an empty label")]
    EmptyLabel(String),
}

/// Maps a camera id to the label every detection on that camera is reported as.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelOverrides {
    forced: BTreeMap<usize, String>,
}

impl LabelOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, camera_id: usize, label: impl Into<String>) -> Self {
        self.insert(camera_id, label);
        self
    }

    pub fn insert(&mut self, camera_id: usize, label: impl Into<String>) {
        self.forced.insert(camera_id, label.into());
    }

    pub fn forced_label(&self, camera_id: usize) -> Option<&str> {
        self.forced.get(&camera_id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.forced.is_empty()
    }

    pub fn len(&self) -> usize {
        self.forced.len()
    }
}

impl FromStr for LabelOverrides {
    type Err = ParseOverrideError;

    /// Parses `"1=cow, 2=goat"`. Blank input yields an empty table.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut table = LabelOverrides::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, label) = entry
                .split_once('=')
                .ok_or_else(|| ParseOverrideError::Malformed(entry.to_string()))?;
            let id: usize = id
                .trim()
                .parse()
                .map_err(|_| ParseOverrideError::BadCameraId(entry.to_string()))?;
            let label = label.trim();
            if label.is_empty() {
                return Err(ParseOverrideError::EmptyLabel(entry.to_string()));
            }
            table.insert(id, label.to_lowercase());
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_override_list() {
        let table: LabelOverrides = "1=cow, 2=Goat ,3=pig".parse().unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.forced_label(1), Some("cow"));
        assert_eq!(table.forced_label(2), Some("goat"));
        assert_eq!(table.forced_label(0), None);
    }

    #[test]
    fn blank_override_list_is_empty() {
        let table: LabelOverrides = "  ".parse().unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn rejects_malformed_entries() {
        assert_eq!(
            "1cow".parse::<LabelOverrides>(),
            Err(ParseOverrideError::Malformed("1cow".into()))
        );
        assert_eq!(
            "x=cow".parse::<LabelOverrides>(),
            Err(ParseOverrideError::BadCameraId("x=cow".into()))
        );
        assert_eq!(
            "2=".parse::<LabelOverrides>(),
            Err(ParseOverrideError::EmptyLabel("2=".into()))
        );
    }
}
