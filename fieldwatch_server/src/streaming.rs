//! Multipart JPEG streaming (`multipart/x-mixed-replace`).
//!
//! Each HTTP viewer gets its own hub subscription. The response body ends when
//! the camera's channel closes; a client disconnect drops the body and with it
//! the subscription.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use fieldwatch::{Frame, Subscription};
use futures_util::Stream;

use crate::AppState;

pub const BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// One multipart part as body chunks: boundary and header, the frame's shared
/// JPEG buffer, CRLF.
pub fn multipart_part(frame: &Frame) -> [Bytes; 3] {
    [
        Bytes::from_static(PART_HEADER),
        frame.data.clone(),
        Bytes::from_static(PART_TRAILER),
    ]
}

/// Turns a subscription into a body stream. `None` yields an empty body.
pub fn frame_stream(subscription: Option<Subscription>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    async_stream::stream! {
        if let Some(mut subscription) = subscription {
            let camera_id = subscription.camera_id();
            tracing::debug!(camera_id, "Viewer connected");
            while let Some(frame) = subscription.next_frame().await {
                for chunk in multipart_part(&frame) {
                    yield Ok(chunk);
                }
            }
            tracing::debug!(camera_id, skipped = subscription.skipped(), "Viewer stream closed");
        }
    }
}

/// `GET /video_feed/{camera_id}`. Unknown or non-numeric ids get an empty stream.
pub async fn video_feed(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let subscription = match raw_id.parse::<usize>() {
        Ok(camera_id) => match state.pipeline.subscribe(camera_id) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::debug!(camera_id, error = %e, "Stream requested for unavailable camera");
                None
            }
        },
        Err(_) => {
            tracing::debug!(camera_id = %raw_id, "Stream requested for non-numeric camera id");
            None
        }
    };

    (
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frame_stream(subscription)),
    )
        .into_response()
}
