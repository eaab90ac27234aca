//! The ingest consume loop.
//!
//! At-least-once from producers, but the gateway never re-reads a record it
//! has seen: every entry is acked whether it was broadcast, dropped, or
//! failed validation. Sanitized messages go to the fan-out queue (lossy) and
//! to the firehose stream — a full fan-out queue drops the push delivery but
//! still forwards to the firehose.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crowdcast_bus::{Backoff, BusEntry, StreamBus};
use crowdcast_protocol::{validate, ChatMessage};

use crate::app::AppState;

const READ_COUNT: usize = 50;
const READ_BLOCK_MS: usize = 1000;

pub async fn run(state: Arc<AppState>, cancel: CancellationToken) {
    let mut backoff = Backoff::new();
    let mut bus: Option<StreamBus> = None;

    while !cancel.is_cancelled() {
        if bus.is_none() {
            match connect(&state).await {
                Ok(handle) => {
                    backoff.reset();
                    bus = Some(handle);
                }
                Err(e) => {
                    warn!(error = %e, delay = ?backoff.current(), "broker connect failed; backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = backoff.sleep() => {}
                    }
                    continue;
                }
            }
        }
        let Some(handle) = bus.as_mut() else { continue };

        let entries = match handle
            .read(
                &state.settings.ingest_stream,
                &state.settings.consumer_group,
                &state.settings.consumer_name,
                READ_COUNT,
                READ_BLOCK_MS,
            )
            .await
        {
            Ok(entries) => entries,
            Err(e) if e.is_connection() => {
                warn!(error = %e, delay = ?backoff.current(), "broker connection lost; reconnecting");
                bus = None;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = backoff.sleep() => {}
                }
                continue;
            }
            Err(e) => {
                error!(error = %e, "ingest read failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                }
                continue;
            }
        };
        backoff.reset();

        for entry in entries {
            handle_entry(handle, &state, entry).await;
        }
    }
    info!("ingest loop stopped");
}

async fn connect(state: &AppState) -> Result<StreamBus, crowdcast_bus::BusError> {
    let mut bus = StreamBus::connect(&state.settings.redis_url).await?;
    bus.ensure_group(
        &state.settings.ingest_stream,
        &state.settings.consumer_group,
    )
    .await?;
    info!(url = %state.settings.redis_url, "gateway connected to broker");
    Ok(bus)
}

async fn handle_entry(bus: &mut StreamBus, state: &Arc<AppState>, entry: BusEntry) {
    state.stats.messages_consumed.fetch_add(1, Ordering::Relaxed);

    match process_entry(bus, state, &entry).await {
        Ok(true) => {
            state.stats.messages_broadcast.fetch_add(1, Ordering::Relaxed);
        }
        Ok(false) => {
            state.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
        }
        Err(reason) => {
            warn!(entry = %entry.id, %reason, "failed to process ingest entry");
            state.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    // terminal in every case: broadcast, drop, or failure
    bus.ack(
        &state.settings.ingest_stream,
        &state.settings.consumer_group,
        &entry.id,
    )
    .await;
}

/// Returns Ok(true) when the message reached the fan-out queue, Ok(false)
/// when it was dropped by safety or queue overflow.
async fn process_entry(
    bus: &mut StreamBus,
    state: &Arc<AppState>,
    entry: &BusEntry,
) -> Result<bool, String> {
    let message: ChatMessage =
        serde_json::from_str(&entry.data).map_err(|e| format!("malformed JSON: {e}"))?;
    validate::validate_chat_message(&message).map_err(|e| e.to_string())?;

    let Some(sanitized) = state.safety.process(message) else {
        return Ok(false);
    };

    let sent = state
        .fanout
        .enqueue_broadcast(&sanitized.room_id, sanitized.clone());

    let json = serde_json::to_string(&sanitized).map_err(|e| e.to_string())?;
    if let Err(e) = bus.append(&state.settings.firehose_stream, &json).await {
        return Err(format!("firehose append failed: {e}"));
    }

    Ok(sent)
}
