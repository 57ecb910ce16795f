// THEORY:
// The `BroadcastHub` is the fan-out point between camera workers and viewers.
// It is a generalization of a single-feed frame bus to one bus per camera.
//
// Key architectural principles:
// 1.  **Decode Once, Deliver Many**: A worker publishes each encoded frame once.
//     Every subscriber of that camera receives the same `Arc<Frame>`; viewer
//     count never changes the amount of decoding or encoding work.
// 2.  **Lossy for the Slow, Ordered for All**: Each camera has a bounded
//     broadcast channel. A subscriber that falls behind loses its oldest unread
//     frames and resumes with the newest; it never sees frames out of order,
//     and publishing never waits for anyone.
// 3.  **Latest Slot**: Besides the channel, the hub keeps the most recent
//     frame per camera for snapshot requests. It is replaced by an `Arc` swap
//     under a short write lock; the worker is its only writer.
// 4.  **Closing Ends Streams**: When a camera stalls or stops, its sender is
//     dropped. Every subscriber's next receive then reports closure, which is
//     how viewer streams end without any explicit per-viewer bookkeeping.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::{PipelineError, Result};
use crate::frame::Frame;

struct CameraChannel {
    frames_tx: RwLock<Option<broadcast::Sender<Arc<Frame>>>>,
    latest: RwLock<Option<Arc<Frame>>>,
}

pub struct BroadcastHub {
    channels: Vec<CameraChannel>,
    capacity: usize,
}

impl BroadcastHub {
    /// Creates one open channel per camera.
    pub fn new(camera_count: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let channels = (0..camera_count)
            .map(|_| {
                let (tx, _) = broadcast::channel(capacity);
                CameraChannel {
                    frames_tx: RwLock::new(Some(tx)),
                    latest: RwLock::new(None),
                }
            })
            .collect();
        Self { channels, capacity }
    }

    fn channel(&self, camera_id: usize) -> Result<&CameraChannel> {
        self.channels
            .get(camera_id)
            .ok_or(PipelineError::SourceUnavailable(camera_id))
    }

    pub fn camera_count(&self) -> usize {
        self.channels.len()
    }

    /// Re-opens a closed camera channel. An open channel is left untouched.
    pub fn open(&self, camera_id: usize) -> Result<()> {
        let channel = self.channel(camera_id)?;
        let mut tx = channel.frames_tx.write().unwrap_or_else(PoisonError::into_inner);
        if tx.is_none() {
            *tx = Some(broadcast::channel(self.capacity).0);
        }
        Ok(())
    }

    /// Drops the camera's sender so every subscriber's stream ends.
    pub fn close(&self, camera_id: usize) {
        if let Ok(channel) = self.channel(camera_id) {
            channel
                .frames_tx
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
    }

    pub fn is_open(&self, camera_id: usize) -> bool {
        self.channel(camera_id)
            .map(|c| c.frames_tx.read().unwrap_or_else(PoisonError::into_inner).is_some())
            .unwrap_or(false)
    }

    /// Stores `frame` as the camera's latest and sends it to current subscribers.
    pub fn publish(&self, frame: Frame) -> Result<Arc<Frame>> {
        let channel = self.channel(frame.camera_id)?;
        let frame = Arc::new(frame);
        *channel.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&frame));

        if let Some(tx) = channel
            .frames_tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            // No subscribers is not an error.
            let _ = tx.send(Arc::clone(&frame));
        }
        Ok(frame)
    }

    /// Subscribes to the camera's frames. The first frame received is the next
    /// one published after this call.
    pub fn subscribe(&self, camera_id: usize) -> Result<Subscription> {
        let channel = self.channel(camera_id)?;
        let rx = channel
            .frames_tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(PipelineError::SourceUnavailable(camera_id))?;
        Ok(Subscription {
            camera_id,
            rx,
            skipped: 0,
        })
    }

    pub fn latest(&self, camera_id: usize) -> Option<Arc<Frame>> {
        self.channel(camera_id)
            .ok()?
            .latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn viewer_count(&self, camera_id: usize) -> usize {
        self.channel(camera_id)
            .ok()
            .and_then(|c| {
                c.frames_tx
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .map(broadcast::Sender::receiver_count)
            })
            .unwrap_or(0)
    }
}

/// One viewer's delivery channel. Dropping it unsubscribes.
pub struct Subscription {
    camera_id: usize,
    rx: broadcast::Receiver<Arc<Frame>>,
    skipped: u64,
}

impl Subscription {
    /// Waits for the next frame, skipping any this subscriber lagged past.
    /// Returns `None` once the camera's channel has closed.
    pub async fn next_frame(&mut self) -> Option<Arc<Frame>> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(RecvError::Lagged(n)) => {
                    self.skipped += n;
                    tracing::debug!(camera_id = self.camera_id, skipped = n, "Viewer lagged, skipping frames");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn camera_id(&self) -> usize {
        self.camera_id
    }

    /// Total frames this subscriber has lost to lag.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
