use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod perceiver;

use perceiver::StreamPerceiver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crowdcast_perceiver=info".into()),
        )
        .init();

    let settings = crowdcast_core::config::PerceiverSettings::load()?;
    let service = Arc::new(StreamPerceiver::new(settings)?);

    let cancel = CancellationToken::new();
    let consumer = tokio::spawn(service.clone().run(cancel.clone()));

    let port = service.settings.http_port;
    let router = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/stats", get(stats_handler))
        .with_state(service)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!(%addr, "crowdcast perceiver listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = consumer.await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

async fn healthz_handler() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn stats_handler(State(service): State<Arc<StreamPerceiver>>) -> Json<Value> {
    let mut stats = service.stats.as_json();
    stats["frames_stream"] = json!(&service.settings.stream_frames_key);
    stats["transcripts_stream"] = json!(&service.settings.stream_transcripts_key);
    stats["observations_stream"] = json!(&service.settings.stream_observations_key);
    stats["consumer_group"] = json!(&service.settings.consumer_group);
    stats["transcript_join_window_ms"] = json!(service.settings.transcript_join_window_ms);
    stats["transcript_buffer_retention_ms"] = json!(service.settings.transcript_buffer_retention_ms);
    Json(stats)
}
