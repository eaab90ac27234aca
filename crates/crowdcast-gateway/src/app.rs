use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};

use crowdcast_core::config::GatewaySettings;

use crate::fanout::FanoutManager;
use crate::safety::SafetyPipeline;

#[derive(Default)]
pub struct GatewayStats {
    pub messages_consumed: AtomicU64,
    pub messages_broadcast: AtomicU64,
    pub messages_dropped: AtomicU64,
}

impl GatewayStats {
    pub fn as_json(&self, active_ws: usize) -> Value {
        json!({
            "messages_consumed": self.messages_consumed.load(Ordering::Relaxed),
            "messages_broadcast": self.messages_broadcast.load(Ordering::Relaxed),
            "messages_dropped": self.messages_dropped.load(Ordering::Relaxed),
            "active_ws_connections": active_ws,
        })
    }
}

/// Shared state for HTTP handlers and the bus loop.
pub struct AppState {
    pub settings: GatewaySettings,
    pub safety: SafetyPipeline,
    pub fanout: FanoutManager,
    pub stats: GatewayStats,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::http::healthz_handler))
        .route("/stats", get(crate::http::stats_handler))
        .route("/ws", get(crate::ws::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
