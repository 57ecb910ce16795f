// THEORY:
// The `pipeline` module is the top-level API of the engine. It wires the
// catalog, the hub, the alert store and one worker per camera into a single
// `SurveillancePipeline` that a server (or a test) can start, observe, poke
// and shut down.
//
// Key architectural principles:
// 1.  **One Task per Camera**: `start` spawns one tokio task per catalog
//     entry. Workers share nothing but the hub and the alert store.
// 2.  **Supervision by Observation**: The pipeline does not restart workers on
//     its own accord. It keeps a `watch` channel of every camera's state and
//     offers `reopen`, which revives a stalled camera with a fresh worker and
//     decoder. A periodic probe can call it on a timer.
// 3.  **Continuous Sequences**: A revived camera continues numbering after the
//     last frame it published, so a viewer never sees a sequence go backwards.
// 4.  **Cooperative Shutdown**: `shutdown` flips a `watch` flag, waits for
//     every worker to release its decoder, and leaves every camera `Stopped`
//     with its hub channel closed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alerts::AlertStore;
use crate::catalog::SourceCatalog;
use crate::config::PipelineConfig;
use crate::decoder::DecoderBackend;
use crate::detection::{ClassCatalog, DetectorFactory};
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::hub::{BroadcastHub, Subscription};
use crate::worker::{CameraState, CameraWorker, StallReason, WorkerContext};

/// Diagnostic view of one camera.
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub id: usize,
    pub name: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stall_reason: Option<StallReason>,
    pub viewers: usize,
}

/// Result of a reopen request for an existing camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenOutcome {
    /// The camera was stalled; a fresh worker has been spawned.
    Reopened,
    /// The camera was not stalled, nothing was done.
    NotStalled(CameraState),
}

pub struct SurveillancePipeline {
    catalog: Arc<SourceCatalog>,
    ctx: WorkerContext,
    detectors: DetectorFactory,
    states: Vec<Arc<watch::Sender<CameraState>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<CameraState>>>,
    started: AtomicBool,
}

impl SurveillancePipeline {
    pub fn new(
        catalog: SourceCatalog,
        backend: Arc<dyn DecoderBackend>,
        detectors: DetectorFactory,
        config: PipelineConfig,
    ) -> Self {
        let hub = BroadcastHub::new(catalog.len(), config.frame_channel_capacity);
        let alerts = AlertStore::new(config.alert_capacity, config.alert_channel_capacity);
        let states = (0..catalog.len())
            .map(|_| Arc::new(watch::channel(CameraState::Idle).0))
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            catalog: Arc::new(catalog),
            ctx: WorkerContext {
                backend,
                config: Arc::new(config),
                classes: Arc::new(ClassCatalog::default()),
                hub: Arc::new(hub),
                alerts: Arc::new(alerts),
            },
            detectors,
            states,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Replaces the default class catalog. Only meaningful before `start`.
    pub fn with_class_catalog(mut self, classes: ClassCatalog) -> Self {
        self.ctx.classes = Arc::new(classes);
        self
    }

    /// Spawns one worker per camera. Must be called from within a tokio
    /// runtime; calling it again has no effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Pipeline already started");
            return;
        }
        for id in 0..self.catalog.len() {
            if let Err(e) = self.spawn_worker(id, 0) {
                tracing::error!(camera_id = id, error = %e, "Could not start camera worker");
            }
        }
        tracing::info!(cameras = self.catalog.len(), "Surveillance pipeline started");
    }

    fn spawn_worker(&self, camera_id: usize, first_sequence: u64) -> Result<()> {
        let source = self.catalog.get(camera_id)?.clone();
        let detector = (self.detectors)(&source);
        let worker = CameraWorker::new(
            source,
            self.ctx.clone(),
            detector,
            Arc::clone(&self.states[camera_id]),
            first_sequence,
        );
        let handle = tokio::spawn(worker.run(self.shutdown_tx.subscribe()));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.ctx.hub
    }

    pub fn alerts(&self) -> &Arc<AlertStore> {
        &self.ctx.alerts
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    pub fn state(&self, camera_id: usize) -> Result<CameraState> {
        self.states
            .get(camera_id)
            .map(|tx| *tx.borrow())
            .ok_or(PipelineError::SourceUnavailable(camera_id))
    }

    pub fn watch_state(&self, camera_id: usize) -> Result<watch::Receiver<CameraState>> {
        self.states
            .get(camera_id)
            .map(|tx| tx.subscribe())
            .ok_or(PipelineError::SourceUnavailable(camera_id))
    }

    pub fn subscribe(&self, camera_id: usize) -> Result<Subscription> {
        self.ctx.hub.subscribe(camera_id)
    }

    pub fn snapshot(&self, camera_id: usize) -> Option<Arc<Frame>> {
        self.ctx.hub.latest(camera_id)
    }

    pub fn camera_status(&self) -> Vec<CameraStatus> {
        self.catalog
            .sources()
            .iter()
            .map(|source| {
                let state = *self.states[source.id].borrow();
                CameraStatus {
                    id: source.id,
                    name: source.name.clone(),
                    path: source.path.clone(),
                    width: source.width,
                    height: source.height,
                    fps: source.fps,
                    frame_count: source.frame_count,
                    state: state.label(),
                    stall_reason: state.stall_reason(),
                    viewers: self.ctx.hub.viewer_count(source.id),
                }
            })
            .collect()
    }

    /// Revives a stalled camera with a fresh worker. Cameras in any other
    /// state, and every camera after shutdown, are left alone.
    pub fn reopen(&self, camera_id: usize) -> Result<ReopenOutcome> {
        let state_tx = self
            .states
            .get(camera_id)
            .ok_or(PipelineError::SourceUnavailable(camera_id))?;

        if *self.shutdown_tx.borrow() {
            return Ok(ReopenOutcome::NotStalled(*state_tx.borrow()));
        }

        let mut previous = CameraState::Idle;
        let revived = state_tx.send_if_modified(|state| {
            previous = *state;
            if state.is_stalled() {
                *state = CameraState::Idle;
                true
            } else {
                false
            }
        });
        if !revived {
            return Ok(ReopenOutcome::NotStalled(previous));
        }

        self.ctx.hub.open(camera_id)?;
        let first_sequence = self
            .ctx
            .hub
            .latest(camera_id)
            .map(|frame| frame.sequence + 1)
            .unwrap_or(0);
        tracing::info!(camera_id, previous = ?previous, first_sequence, "Reopening stalled camera");
        self.spawn_worker(camera_id, first_sequence)?;
        Ok(ReopenOutcome::Reopened)
    }

    /// Periodically tries to reopen every stalled camera until shutdown.
    pub fn spawn_reopen_probe(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for camera_id in 0..pipeline.catalog.len() {
                            match pipeline.reopen(camera_id) {
                                Ok(ReopenOutcome::Reopened) => {
                                    tracing::info!(camera_id, "Reopen probe revived camera");
                                }
                                Ok(ReopenOutcome::NotStalled(_)) => {}
                                Err(e) => tracing::warn!(camera_id, error = %e, "Reopen probe failed"),
                            }
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Reopen probe stopped");
        })
    }

    /// Signals every worker to stop and waits for them to release their decoders.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Camera worker ended abnormally");
            }
        }
        for (camera_id, state) in self.states.iter().enumerate() {
            self.ctx.hub.close(camera_id);
            state.send_replace(CameraState::Stopped);
        }
        tracing::info!("Surveillance pipeline shut down");
    }

    /// `shutdown`, but waiting at most `grace` for workers stuck in the decoder.
    /// Cameras are marked `Stopped` and their streams ended either way; returns
    /// whether every worker finished in time.
    pub async fn shutdown_within(&self, grace: Duration) -> bool {
        if tokio::time::timeout(grace, self.shutdown()).await.is_ok() {
            return true;
        }
        tracing::warn!(grace_ms = grace.as_millis() as u64, "Camera workers did not stop in time");
        for (camera_id, state) in self.states.iter().enumerate() {
            self.ctx.hub.close(camera_id);
            state.send_replace(CameraState::Stopped);
        }
        false
    }
}
