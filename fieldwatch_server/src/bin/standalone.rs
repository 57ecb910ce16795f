use std::sync::Arc;
use std::time::Duration;

use fieldwatch::{SourceCatalog, SurveillancePipeline, default_backend};
use fieldwatch_server::{AppState, ServerConfig, start_server};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldwatch=info,fieldwatch_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = ServerConfig::from_env()?;
    tracing::info!(
        bind = %cfg.bind_addr,
        video_dir = %cfg.video_dir.display(),
        detector = ?cfg.detector,
        "Starting FieldWatch v{}",
        env!("CARGO_PKG_VERSION")
    );

    let backend = default_backend();
    let catalog = SourceCatalog::scan(&cfg.video_dir, backend.as_ref());
    let pipeline = Arc::new(SurveillancePipeline::new(
        catalog,
        backend,
        cfg.detector.factory(),
        cfg.pipeline.clone(),
    ));
    pipeline.start();
    if let Some(interval) = cfg.reopen_interval {
        pipeline.spawn_reopen_probe(interval);
    }

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let (_addr, server) = start_server(AppState::new(Arc::clone(&pipeline)), &cfg.bind_addr, async move {
        let _ = stop_rx.await;
    })
    .await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    pipeline.shutdown_within(SHUTDOWN_GRACE).await;
    let _ = stop_tx.send(());
    if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
        tracing::warn!("HTTP server did not drain in time");
    }
    Ok(())
}
