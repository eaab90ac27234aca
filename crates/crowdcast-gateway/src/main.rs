use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

mod app;
mod fanout;
mod http;
mod ingest;
mod safety;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crowdcast_gateway=info,tower_http=info".into()),
        )
        .init();

    let settings = crowdcast_core::config::GatewaySettings::load()?;
    let safety = safety::SafetyPipeline::load(
        settings.content_max_length,
        settings.moderation_config.as_deref().map(Path::new),
    );
    let (fanout, queue_rx) = fanout::FanoutManager::new(settings.broadcast_queue_size);

    let port = settings.port;
    let state = Arc::new(app::AppState {
        settings,
        safety,
        fanout,
        stats: app::GatewayStats::default(),
    });

    let cancel = CancellationToken::new();

    let worker = {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { state.fanout.run_worker(queue_rx, cancel).await })
    };
    let consumer = {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ingest::run(state, cancel).await })
    };

    let router = app::build_router(state);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!(%addr, "crowdcast gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = worker.await;
    let _ = consumer.await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
