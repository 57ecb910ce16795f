#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fieldwatch::{
    CameraSource, DecoderBackend, DetectorKind, FrameDecoder, PipelineConfig, PipelineError,
    ReadOutcome, Result, SourceCatalog, SourceMetadata, SurveillancePipeline,
};
use fieldwatch_server::{AppState, start_server};
use image::RgbImage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const WAIT: Duration = Duration::from_secs(5);

/// Backend whose sources either loop forever or cannot be opened.
pub struct LoopingBackend {
    pub openable: bool,
}

impl DecoderBackend for LoopingBackend {
    fn name(&self) -> &str {
        "looping"
    }

    fn probe(&self, _path: &Path) -> Result<SourceMetadata> {
        Ok(SourceMetadata {
            width: 64,
            height: 48,
            fps: 25.0,
            frame_count: 100,
        })
    }

    fn open(&self, source: &CameraSource) -> Result<Box<dyn FrameDecoder>> {
        if !self.openable {
            return Err(PipelineError::unopenable(source.path.display().to_string(), "test"));
        }
        Ok(Box::new(Looping))
    }
}

struct Looping;

impl FrameDecoder for Looping {
    fn read(&mut self) -> Result<ReadOutcome> {
        Ok(ReadOutcome::Frame(RgbImage::from_pixel(64, 48, image::Rgb([20, 60, 20]))))
    }

    fn rewind(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn pipeline(cameras: usize, openable: bool) -> Arc<SurveillancePipeline> {
    let catalog = SourceCatalog::from_sources(
        (0..cameras).map(|i| CameraSource::new(i, format!("/videos/field{i}.mp4"))),
    );
    let config = PipelineConfig {
        cycle_delay: Duration::from_millis(5),
        ..Default::default()
    };
    Arc::new(SurveillancePipeline::new(
        catalog,
        Arc::new(LoopingBackend { openable }),
        DetectorKind::None.factory(),
        config,
    ))
}

pub async fn serve(pipeline: &Arc<SurveillancePipeline>) -> SocketAddr {
    let (addr, _handle) = start_server(
        AppState::new(Arc::clone(pipeline)),
        "127.0.0.1:0",
        std::future::pending(),
    )
    .await
    .expect("start server");
    addr
}

/// Sends one request with `Connection: close` and reads the whole response.
pub async fn send_raw(addr: SocketAddr, method: &str, path: &str) -> (u16, String, Vec<u8>) {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n");
    stream.write_all(req.as_bytes()).await.expect("write request");
    let mut response = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut response))
        .await
        .expect("response timed out")
        .expect("read response");
    split_response(&response)
}

pub fn split_response(response: &[u8]) -> (u16, String, Vec<u8>) {
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("http response must have separator");
    let head = String::from_utf8_lossy(&response[..split]).to_string();
    let body = response[split + 4..].to_vec();
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("http status");
    (status, head, body)
}

pub fn json_body(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("json body")
}
