use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /healthz — liveness probe. Always ok while the process is up.
pub async fn healthz_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// GET /stats — counters plus the configured values operators care about.
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut stats = state
        .stats
        .as_json(state.fanout.active_connections());
    stats["active_rooms"] = json!(state.fanout.room_count());
    stats["ingest_stream"] = json!(&state.settings.ingest_stream);
    stats["firehose_stream"] = json!(&state.settings.firehose_stream);
    stats["consumer_group"] = json!(&state.settings.consumer_group);
    stats["content_max_length"] = json!(state.settings.content_max_length);
    stats["broadcast_queue_size"] = json!(state.settings.broadcast_queue_size);
    stats["default_room"] = json!(&state.settings.default_room);
    Json(stats)
}
