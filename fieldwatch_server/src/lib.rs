// THEORY:
// The server crate is a thin HTTP skin over `SurveillancePipeline`. It owns no
// camera state of its own: every handler reads from the pipeline, the hub or
// the alert store and translates the answer into HTTP.
//
// Key architectural principles:
// 1.  **One Subscription per Connection**: Video viewers and real-time alert
//     listeners each get their own channel receiver, created on connect and
//     dropped on disconnect. A slow or broken client only affects itself.
// 2.  **Errors as Data**: Failures leave handlers as `ApiError`, which renders
//     a `{error_code, message}` JSON body with the matching status.
// 3.  **Graceful Shutdown Order**: Stopping the pipeline first closes every
//     camera channel, which completes the open video streams; only then is the
//     listener asked to drain.

pub mod config;
pub mod error;
pub mod streaming;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use fieldwatch::{Alert, CameraStatus, FRAME_CONTENT_TYPE, ReopenOutcome, SurveillancePipeline};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};

pub use config::ServerConfig;
pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SurveillancePipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<SurveillancePipeline>) -> Self {
        Self { pipeline }
    }
}

/// Message pushed to real-time alert listeners.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LiveEvent {
    NewAlert(Alert),
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/video_feed/:camera_id", get(streaming::video_feed))
        .route("/api/alerts", get(list_alerts))
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras/:camera_id/reopen", post(reopen_camera))
        .route("/api/cameras/:camera_id/snapshot.jpg", get(snapshot))
        .route("/ws/alerts", get(alerts_ws))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Binds `bind_addr` and serves the router until `shutdown` resolves.
pub async fn start_server(
    state: AppState,
    bind_addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server listening");

    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    });
    Ok((addr, handle))
}

/// `GET /api/alerts`: the retained alerts, newest last.
async fn list_alerts(State(state): State<AppState>) -> Json<Vec<Alert>> {
    let alerts = state.pipeline.alerts();
    Json(alerts.query_recent(alerts.capacity()))
}

async fn list_cameras(State(state): State<AppState>) -> Json<Vec<CameraStatus>> {
    Json(state.pipeline.camera_status())
}

async fn reopen_camera(
    State(state): State<AppState>,
    Path(camera_id): Path<usize>,
) -> error::Result<Response> {
    match state.pipeline.reopen(camera_id)? {
        ReopenOutcome::Reopened => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "camera_id": camera_id, "status": "reopening" })),
        )
            .into_response()),
        ReopenOutcome::NotStalled(current) => Err(ApiError::NotStalled {
            camera_id,
            state: current.label(),
        }),
    }
}

async fn snapshot(State(state): State<AppState>, Path(camera_id): Path<usize>) -> error::Result<Response> {
    state.pipeline.catalog().get(camera_id)?;
    Ok(match state.pipeline.snapshot(camera_id) {
        Some(frame) => (
            [(header::CONTENT_TYPE, FRAME_CONTENT_TYPE)],
            frame.data.clone(),
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn alerts_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let alerts = state.pipeline.alerts().subscribe();
    ws.on_upgrade(move |socket| forward_alerts(socket, alerts))
}

async fn forward_alerts(socket: WebSocket, mut alerts: broadcast::Receiver<Alert>) {
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!("Alert listener connected");
    loop {
        tokio::select! {
            received = alerts.recv() => match received {
                Ok(alert) => {
                    let text = match serde_json::to_string(&LiveEvent::NewAlert(alert)) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, "Could not serialize alert");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Alert listener lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("Alert listener disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_event_shape() {
        let alert = Alert {
            kind: "cow_detected".into(),
            message: "Cow Detected".into(),
            camera_id: 2,
            confidence: 0.75,
            timestamp: "2024-05-01 12:00:00".into(),
        };
        let json = serde_json::to_value(LiveEvent::NewAlert(alert)).unwrap();
        assert_eq!(json["event"], "new_alert");
        assert_eq!(json["data"]["type"], "cow_detected");
        assert_eq!(json["data"]["camera_id"], 2);
    }
}
