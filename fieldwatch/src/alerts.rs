// THEORY:
// The `AlertStore` has two audiences with different needs. Polling clients want
// "what happened recently", so the store keeps a bounded ring of the newest
// alerts and evicts the oldest on overflow. Real-time clients want every alert
// as it happens, so each alert is also pushed to a broadcast channel that may
// have zero or more listeners.
//
// Key architectural principles:
// 1.  **Bounded Retention**: The ring never grows past its capacity. Reading
//     does not consume; `query_recent` only copies.
// 2.  **Publish Regardless of Retention**: A live listener receives every
//     alert even when the ring has already evicted it.
// 3.  **Never Block the Producer**: Appending takes a short lock and publishing
//     is a non-blocking broadcast send. Slow listeners lag, they do not stall
//     camera workers.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::detection::{ClassCatalog, Detection};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A notification raised by one qualifying detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// `"{label}_detected"`, using the label after overrides.
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub camera_id: usize,
    pub confidence: f32,
    /// Local wall-clock time, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
}

impl Alert {
    pub fn from_detection(camera_id: usize, detection: &Detection, classes: &ClassCatalog) -> Self {
        Self {
            kind: format!("{}_detected", detection.label),
            message: classes.message_for(&detection.label),
            camera_id,
            confidence: detection.confidence,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

pub struct AlertStore {
    recent: RwLock<VecDeque<Alert>>,
    capacity: usize,
    live_tx: broadcast::Sender<Alert>,
}

impl AlertStore {
    pub fn new(capacity: usize, channel_capacity: usize) -> Self {
        let (live_tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            recent: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            live_tx,
        }
    }

    /// Stores `alert`, evicting the oldest one when the ring is full.
    pub fn append(&self, alert: Alert) {
        let mut recent = self.recent.write().unwrap_or_else(PoisonError::into_inner);
        self.push_locked(&mut recent, alert);
    }

    /// Pushes `alert` to live listeners, returning how many received it.
    pub fn publish(&self, alert: Alert) -> usize {
        // An error only means nobody is listening right now.
        self.live_tx.send(alert).unwrap_or(0)
    }

    /// Stores and publishes `alert`. The ring lock is held across both, so
    /// polling clients and live listeners see alerts in the same order.
    pub fn record(&self, alert: Alert) -> usize {
        let mut recent = self.recent.write().unwrap_or_else(PoisonError::into_inner);
        self.push_locked(&mut recent, alert.clone());
        self.publish(alert)
    }

    fn push_locked(&self, recent: &mut VecDeque<Alert>, alert: Alert) {
        if self.capacity == 0 {
            return;
        }
        while recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(alert);
    }

    /// Up to `n` of the most recent alerts, newest last.
    pub fn query_recent(&self, n: usize) -> Vec<Alert> {
        let recent = self.recent.read().unwrap_or_else(PoisonError::into_inner);
        let skip = recent.len().saturating_sub(n);
        recent.iter().skip(skip).cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.live_tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.live_tx.receiver_count()
    }

    pub fn len(&self) -> usize {
        self.recent.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    fn alert(n: usize) -> Alert {
        Alert {
            kind: "cow_detected".into(),
            message: format!("alert {n}"),
            camera_id: 0,
            confidence: 0.9,
            timestamp: "2024-01-01 00:00:00".into(),
        }
    }

    #[test]
    fn ring_evicts_oldest() {
        let store = AlertStore::new(10, 16);
        for n in 1..=11 {
            store.append(alert(n));
        }
        assert_eq!(store.len(), 10);
        let messages: Vec<_> = store.query_recent(10).into_iter().map(|a| a.message).collect();
        let expected: Vec<_> = (2..=11).map(|n| format!("alert {n}")).collect();
        assert_eq!(messages, expected);
    }

    #[test]
    fn query_recent_returns_newest_last() {
        let store = AlertStore::new(10, 16);
        for n in 1..=5 {
            store.append(alert(n));
        }
        let messages: Vec<_> = store.query_recent(2).into_iter().map(|a| a.message).collect();
        assert_eq!(messages, ["alert 4", "alert 5"]);
        assert_eq!(store.query_recent(50).len(), 5);
    }

    #[tokio::test]
    async fn live_listeners_see_evicted_alerts() {
        let store = AlertStore::new(1, 16);
        let mut rx = store.subscribe();
        assert_eq!(store.record(alert(1)), 1);
        assert_eq!(store.record(alert(2)), 1);
        assert_eq!(rx.recv().await.unwrap().message, "alert 1");
        assert_eq!(rx.recv().await.unwrap().message, "alert 2");
        assert_eq!(store.query_recent(10).len(), 1);
    }

    #[test]
    fn concurrent_recorders_keep_ring_and_live_order_equal() {
        let store = AlertStore::new(100, 256);
        let mut rx = store.subscribe();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for n in 0..25 {
                        store.record(alert(worker * 100 + n));
                    }
                });
            }
        });

        let mut live = Vec::new();
        while let Ok(alert) = rx.try_recv() {
            live.push(alert.message);
        }
        let stored: Vec<_> = store.query_recent(100).into_iter().map(|a| a.message).collect();
        assert_eq!(live.len(), 100);
        assert_eq!(live, stored);
    }

    #[test]
    fn publish_without_listeners_is_fine() {
        let store = AlertStore::new(10, 16);
        assert_eq!(store.record(alert(1)), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn alert_json_shape() {
        let detection = Detection::new("cow", 0.6, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        let alert = Alert::from_detection(3, &detection, &ClassCatalog::default());
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "cow_detected");
        assert_eq!(json["message"], "Cow Detected");
        assert_eq!(json["camera_id"], 3);
        let timestamp = json["timestamp"].as_str().unwrap();
        assert_eq!(timestamp.len(), 19);
        assert_eq!(&timestamp[4..5], "-");
        assert_eq!(&timestamp[10..11], " ");
    }
}
