// THEORY:
// The `SourceCatalog` is the fixed roster of cameras for the lifetime of the
// process. It is built exactly once, at startup, by scanning a directory of
// video files; nothing is ever added or removed afterwards.
//
// Key architectural principles:
// 1.  **Dense, Stable Identity**: Cameras are numbered 0..N in file-name order,
//     so a given directory always yields the same ids and every id below N is
//     valid. The id doubles as an index into the hub and the worker table.
// 2.  **Probing is Diagnostic Only**: Resolution, frame rate and frame count are
//     read through the decoder backend for display. A file that cannot be probed
//     still gets its id; its worker will find out at open time and stall.
// 3.  **Absence is Not Fatal**: A missing or empty directory produces an empty
//     catalog. Every per-camera lookup then fails with `SourceUnavailable` while
//     the rest of the application keeps serving.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::decoder::{DecoderBackend, SourceMetadata};
use crate::error::{PipelineError, Result};

/// File extensions accepted as playable video sources, compared case-insensitively.
pub const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "mkv", "webm", "flv"];

/// A single video source bound to a camera id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraSource {
    pub id: usize,
    pub path: PathBuf,
    /// File name shown in overlays and diagnostics.
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
}

impl CameraSource {
    pub fn new(id: usize, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            id,
            path,
            name,
            width: 0,
            height: 0,
            fps: 0.0,
            frame_count: 0,
        }
    }

    pub fn with_metadata(mut self, meta: SourceMetadata) -> Self {
        self.width = meta.width;
        self.height = meta.height;
        self.fps = meta.fps;
        self.frame_count = meta.frame_count;
        self
    }
}

pub fn is_playable(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// The immutable set of cameras discovered at startup.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: Vec<CameraSource>,
}

impl SourceCatalog {
    /// Scans `dir` once and probes every playable file through `backend`.
    pub fn scan(dir: &Path, backend: &dyn DecoderBackend) -> Self {
        let files = match discover(dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Video directory unavailable, no cameras configured");
                return Self::default();
            }
        };

        if files.is_empty() {
            tracing::warn!(
                dir = %dir.display(),
                extensions = ?VIDEO_EXTENSIONS,
                "No video files found, no cameras configured"
            );
            return Self::default();
        }

        let sources = files
            .into_iter()
            .enumerate()
            .map(|(id, path)| {
                let source = CameraSource::new(id, path);
                match backend.probe(&source.path) {
                    Ok(meta) => {
                        tracing::info!(
                            camera_id = id,
                            name = %source.name,
                            width = meta.width,
                            height = meta.height,
                            fps = meta.fps,
                            frame_count = meta.frame_count,
                            "Camera source registered"
                        );
                        source.with_metadata(meta)
                    }
                    Err(e) => {
                        tracing::error!(camera_id = id, name = %source.name, error = %e, "Could not probe video source");
                        source
                    }
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(backend = backend.name(), cameras = sources.len(), "Source catalog initialized");
        Self { sources }
    }

    /// Builds a catalog from already known sources, renumbering them densely.
    pub fn from_sources(sources: impl IntoIterator<Item = CameraSource>) -> Self {
        let sources = sources
            .into_iter()
            .enumerate()
            .map(|(id, mut source)| {
                source.id = id;
                source
            })
            .collect();
        Self { sources }
    }

    pub fn get(&self, camera_id: usize) -> Result<&CameraSource> {
        self.sources
            .get(camera_id)
            .ok_or(PipelineError::SourceUnavailable(camera_id))
    }

    pub fn sources(&self) -> &[CameraSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Lists the playable files directly under `dir`, sorted by file name.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_playable(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
