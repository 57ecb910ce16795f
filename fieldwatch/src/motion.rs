// THEORY:
// The `MotionDetector` is the anomaly detector that ships with the pipeline. It
// needs no model file: it learns what "normal" change looks like for each patch
// of a camera's view and reports the patches whose change is a statistical
// outlier.
//
// Key architectural principles:
// 1.  **Chunked Temporal Memory**: The frame is cut into a fixed grid of
//     square chunks. Each chunk remembers its previous mean luminance and a
//     sliding window of frame-to-frame luminance deltas.
// 2.  **Adaptive Thresholds**: A chunk is anomalous when its newest delta is
//     more than `ANOMALY_THRESHOLD_STD_DEV` standard deviations above the mean of
//     its own history. Small deltas below `STABLE_LUMINANCE_THRESHOLD` are noise
//     and never fire, so a perfectly static scene stays quiet.
// 3.  **Spatial Grouping**: Anomalous chunks that touch (8-connectivity) are
//     merged into one region. Each region becomes one `Detection` labeled
//     `motion`, boxed in pixel coordinates, scored from its hottest chunk.
// 4.  **Per-Camera State**: The detector is stateful, so every camera worker
//     owns its own instance. A change of frame size resets the learned state.

use std::collections::VecDeque;

use image::RgbImage;

use crate::detection::{BoundingBox, Detection, Detector};
use crate::error::Result;

pub const MOTION_LABEL: &str = "motion";

const HISTORY_WINDOW_SIZE: usize = 20;
const ANOMALY_THRESHOLD_STD_DEV: f64 = 3.0;
const STABLE_LUMINANCE_THRESHOLD: f64 = 2.0;
const DEFAULT_CHUNK_SIZE: u32 = 16;

/// Learned state of one grid cell.
#[derive(Debug, Clone, Default)]
struct ChunkMemory {
    last_luminance: Option<f64>,
    deltas: VecDeque<f64>,
}

impl ChunkMemory {
    /// Feeds the chunk's new mean luminance and returns its significance score
    /// when the change is anomalous.
    fn observe(&mut self, luminance: f64) -> Option<f64> {
        let previous = self.last_luminance.replace(luminance)?;
        let delta = (luminance - previous).abs();

        let score = if self.deltas.len() >= HISTORY_WINDOW_SIZE && delta >= STABLE_LUMINANCE_THRESHOLD {
            let (mean, std_dev) = mean_and_std_dev(&self.deltas);
            let z = significance_score(delta, mean, std_dev);
            (z > ANOMALY_THRESHOLD_STD_DEV).then_some(z)
        } else {
            None
        };

        self.deltas.push_back(delta);
        if self.deltas.len() > HISTORY_WINDOW_SIZE {
            self.deltas.pop_front();
        }
        score
    }
}

fn mean_and_std_dev(history: &VecDeque<f64>) -> (f64, f64) {
    let count = history.len() as f64;
    if count < 1.0 {
        return (0.0, 0.0);
    }
    let mean = history.iter().sum::<f64>() / count;
    let variance = history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    (mean, variance.sqrt())
}

fn significance_score(value: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev < 1e-6 {
        // A static history makes any real change significant; report a high, fixed score.
        return ANOMALY_THRESHOLD_STD_DEV * 2.0;
    }
    (value - mean) / std_dev
}

/// Maps a z-score onto [0, 1] with a logistic curve centered at 1.5x the
/// anomaly threshold. Barely anomalous chunks stay below 0.5.
fn confidence_from_score(z: f64) -> f32 {
    let centered = (z - 1.5 * ANOMALY_THRESHOLD_STD_DEV) / ANOMALY_THRESHOLD_STD_DEV;
    (1.0 / (1.0 + (-centered).exp())) as f32
}

/// Chunk-grid luminance anomaly detector.
pub struct MotionDetector {
    chunk_size: u32,
    frame_width: u32,
    frame_height: u32,
    grid_width: u32,
    grid_height: u32,
    chunks: Vec<ChunkMemory>,
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl MotionDetector {
    pub fn new(chunk_size: u32) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            frame_width: 0,
            frame_height: 0,
            grid_width: 0,
            grid_height: 0,
            chunks: Vec::new(),
        }
    }

    fn ensure_grid(&mut self, width: u32, height: u32) {
        if width == self.frame_width && height == self.frame_height {
            return;
        }
        self.frame_width = width;
        self.frame_height = height;
        self.grid_width = width.div_ceil(self.chunk_size);
        self.grid_height = height.div_ceil(self.chunk_size);
        self.chunks = vec![ChunkMemory::default(); (self.grid_width * self.grid_height) as usize];
    }

    fn chunk_luminance(&self, frame: &RgbImage, cx: u32, cy: u32) -> f64 {
        let x0 = cx * self.chunk_size;
        let y0 = cy * self.chunk_size;
        let x1 = (x0 + self.chunk_size).min(self.frame_width);
        let y1 = (y0 + self.chunk_size).min(self.frame_height);

        let mut sum = 0.0;
        for y in y0..y1 {
            for x in x0..x1 {
                let [r, g, b] = frame.get_pixel(x, y).0;
                sum += 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
            }
        }
        let count = ((x1 - x0) * (y1 - y0)) as f64;
        if count > 0.0 { sum / count } else { 0.0 }
    }

    /// Groups anomalous cells into 8-connected regions, returning each region's
    /// bounds in grid cells (inclusive) and its peak score.
    fn group_regions(&self, heat: &[f64]) -> Vec<((u32, u32, u32, u32), f64)> {
        let gw = self.grid_width as i64;
        let gh = self.grid_height as i64;
        let mut visited = vec![false; heat.len()];
        let mut regions = Vec::new();

        for start in 0..heat.len() {
            if visited[start] || heat[start] <= 0.0 {
                continue;
            }
            visited[start] = true;
            let mut stack = vec![start];
            let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
            let (mut max_x, mut max_y) = (0u32, 0u32);
            let mut peak = 0.0f64;

            while let Some(idx) = stack.pop() {
                let x = (idx as i64 % gw) as u32;
                let y = (idx as i64 / gw) as u32;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                peak = peak.max(heat[idx]);

                for dy in -1..=1i64 {
                    for dx in -1..=1i64 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = x as i64 + dx;
                        let ny = y as i64 + dy;
                        if nx < 0 || ny < 0 || nx >= gw || ny >= gh {
                            continue;
                        }
                        let n = (ny * gw + nx) as usize;
                        if !visited[n] && heat[n] > 0.0 {
                            visited[n] = true;
                            stack.push(n);
                        }
                    }
                }
            }
            regions.push(((min_x, min_y, max_x, max_y), peak));
        }
        regions
    }
}

impl Detector for MotionDetector {
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let (width, height) = frame.dimensions();
        self.ensure_grid(width, height);

        let mut heat = vec![0.0; self.chunks.len()];
        for cy in 0..self.grid_height {
            for cx in 0..self.grid_width {
                let idx = (cy * self.grid_width + cx) as usize;
                let luminance = self.chunk_luminance(frame, cx, cy);
                if let Some(score) = self.chunks[idx].observe(luminance) {
                    heat[idx] = score;
                }
            }
        }

        let chunk = self.chunk_size as f32;
        Ok(self
            .group_regions(&heat)
            .into_iter()
            .map(|((x0, y0, x1, y1), peak)| {
                let bbox = BoundingBox::new(
                    x0 as f32 * chunk,
                    y0 as f32 * chunk,
                    ((x1 + 1) as f32 * chunk).min(width as f32),
                    ((y1 + 1) as f32 * chunk).min(height as f32),
                );
                Detection::new(MOTION_LABEL, confidence_from_score(peak), bbox)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "motion"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gray(width: u32, height: u32, level: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([level, level, level]))
    }

    #[test]
    fn static_scene_stays_quiet() {
        let mut detector = MotionDetector::new(16);
        for _ in 0..40 {
            assert!(detector.infer(&gray(64, 64, 80)).unwrap().is_empty());
        }
    }

    #[test]
    fn sudden_change_is_boxed_once_history_is_learned() {
        let mut detector = MotionDetector::new(16);
        // One frame to seed, then a full window of zero deltas.
        for _ in 0..=HISTORY_WINDOW_SIZE {
            assert!(detector.infer(&gray(64, 64, 50)).unwrap().is_empty());
        }

        let mut frame = gray(64, 64, 50);
        for y in 16..40 {
            for x in 16..40 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let detections = detector.infer(&frame).unwrap();
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(d.label, MOTION_LABEL);
        assert_eq!(d.confidence, confidence_from_score(2.0 * ANOMALY_THRESHOLD_STD_DEV));
        assert!(d.confidence > crate::config::ALERT_THRESHOLD);
        assert_eq!(d.bounding_box, BoundingBox::new(16.0, 16.0, 48.0, 48.0));
    }

    #[test]
    fn separate_regions_are_reported_separately() {
        let mut detector = MotionDetector::new(8);
        for _ in 0..=HISTORY_WINDOW_SIZE {
            detector.infer(&gray(64, 64, 50)).unwrap();
        }
        let mut frame = gray(64, 64, 50);
        for (x0, y0) in [(0u32, 0u32), (48, 48)] {
            for y in y0..y0 + 8 {
                for x in x0..x0 + 8 {
                    frame.put_pixel(x, y, Rgb([250, 250, 250]));
                }
            }
        }
        assert_eq!(detector.infer(&frame).unwrap().len(), 2);
    }

    #[test]
    fn confidence_is_monotonic_in_score() {
        assert!(confidence_from_score(3.0) < confidence_from_score(6.0));
        assert!(confidence_from_score(6.0) < confidence_from_score(12.0));
        assert!((confidence_from_score(4.5) - 0.5).abs() < 1e-6);
        assert!(confidence_from_score(3.0) > crate::config::DISPLAY_THRESHOLD);
    }
}
