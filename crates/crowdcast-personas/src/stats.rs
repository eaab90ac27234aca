//! Worker counters surfaced by `/stats`.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};

const RECENT_DECISIONS: usize = 20;

#[derive(Default)]
pub struct WorkerStats {
    pub messages_consumed: AtomicU64,
    pub messages_deduped: AtomicU64,
    pub messages_published: AtomicU64,
    pub messages_suppressed_cooldown: AtomicU64,
    pub messages_suppressed_budget: AtomicU64,
    pub messages_suppressed_bot_origin: AtomicU64,

    pub observations_consumed: AtomicU64,
    pub auto_messages_published: AtomicU64,

    pub memory_reads_attempted: AtomicU64,
    pub memory_reads_succeeded: AtomicU64,
    pub memory_reads_failed: AtomicU64,
    pub memory_writes_attempted: AtomicU64,
    pub memory_writes_accepted: AtomicU64,
    pub memory_writes_rejected: AtomicU64,
    pub memory_writes_redacted: AtomicU64,
    pub memory_writes_failed: AtomicU64,

    inner: Mutex<StatsInner>,
}

#[derive(Default)]
struct StatsInner {
    decisions_by_reason: HashMap<String, u64>,
    last_decision_reasons: HashMap<String, String>,
    recent_decisions: VecDeque<Value>,
    last_memory_error: Option<String>,
}

impl WorkerStats {
    pub fn record_decision(&self, persona_id: &str, reason: &str, tags: Option<Value>) {
        let mut inner = self.inner.lock().unwrap();
        *inner
            .decisions_by_reason
            .entry(reason.to_string())
            .or_default() += 1;
        inner
            .last_decision_reasons
            .insert(persona_id.to_string(), reason.to_string());

        let mut decision = json!({
            "persona_id": persona_id,
            "reason": reason,
        });
        if let Some(Value::Object(tag_map)) = tags {
            for (k, v) in tag_map {
                decision[k] = v;
            }
        }
        inner.recent_decisions.push_back(decision);
        while inner.recent_decisions.len() > RECENT_DECISIONS {
            inner.recent_decisions.pop_front();
        }
    }

    pub fn record_memory_error(&self, error: String) {
        self.inner.lock().unwrap().last_memory_error = Some(error);
    }

    pub fn as_json(&self, enabled_personas: &[String], room_id: &str, extra: Value) -> Value {
        let inner = self.inner.lock().unwrap();
        let mut out = json!({
            "messages_consumed": self.messages_consumed.load(Ordering::Relaxed),
            "messages_deduped": self.messages_deduped.load(Ordering::Relaxed),
            "messages_published": self.messages_published.load(Ordering::Relaxed),
            "messages_suppressed_cooldown": self.messages_suppressed_cooldown.load(Ordering::Relaxed),
            "messages_suppressed_budget": self.messages_suppressed_budget.load(Ordering::Relaxed),
            "messages_suppressed_bot_origin": self.messages_suppressed_bot_origin.load(Ordering::Relaxed),
            "observations_consumed": self.observations_consumed.load(Ordering::Relaxed),
            "auto_messages_published": self.auto_messages_published.load(Ordering::Relaxed),
            "memory_reads_attempted": self.memory_reads_attempted.load(Ordering::Relaxed),
            "memory_reads_succeeded": self.memory_reads_succeeded.load(Ordering::Relaxed),
            "memory_reads_failed": self.memory_reads_failed.load(Ordering::Relaxed),
            "memory_writes_attempted": self.memory_writes_attempted.load(Ordering::Relaxed),
            "memory_writes_accepted": self.memory_writes_accepted.load(Ordering::Relaxed),
            "memory_writes_rejected": self.memory_writes_rejected.load(Ordering::Relaxed),
            "memory_writes_redacted": self.memory_writes_redacted.load(Ordering::Relaxed),
            "memory_writes_failed": self.memory_writes_failed.load(Ordering::Relaxed),
            "decisions_by_reason": &inner.decisions_by_reason,
            "last_decision_reasons": &inner.last_decision_reasons,
            "recent_decisions": inner.recent_decisions.iter().collect::<Vec<_>>(),
            "last_memory_error": &inner.last_memory_error,
            "enabled_personas": enabled_personas,
            "room_id": room_id,
        });
        if let (Some(out_map), Value::Object(extra_map)) = (out.as_object_mut(), extra) {
            for (k, v) in extra_map {
                out_map.insert(k, v);
            }
        }
        out
    }
}
