//! Process-local runtime state.
//!
//! Everything here is owned by the worker service and mutated under one
//! mutex, so the sliding windows and caches need no internal locking. All
//! timestamps are epoch milliseconds.

use std::collections::{HashMap, VecDeque};

use crowdcast_protocol::{ChatMessage, StreamObservation};

/// Sliding window for the all-events room rate.
pub const EVENT_WINDOW_MS: i64 = 10_000;
/// Sliding window for per-persona mention counting.
pub const MENTION_WINDOW_MS: i64 = 30_000;
/// Cap on buffered observations per room.
pub const OBSERVATION_BUFFER_MAX: usize = 32;

/// Bounded ordered set of seen message ids, evicting the least recently
/// touched entry at capacity.
pub struct DedupeCache {
    capacity: usize,
    seq: u64,
    entries: HashMap<String, u64>,
}

impl DedupeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seq: 0,
            entries: HashMap::new(),
        }
    }

    /// Record `id`; true when it was already present (touch refreshes age).
    pub fn seen_before(&mut self, id: &str) -> bool {
        self.seq += 1;
        if let Some(slot) = self.entries.get_mut(id) {
            *slot = self.seq;
            return true;
        }
        self.entries.insert(id.to_string(), self.seq);
        if self.entries.len() > self.capacity {
            // O(n) eviction scan; capacity is small and insertions rare
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, seq)| **seq)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Minimal projection kept in the room's recent-message ring.
#[derive(Debug, Clone)]
pub struct RecentMessage {
    pub id: String,
    pub ts: String,
    pub origin: String,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub content: String,
}

impl RecentMessage {
    pub fn from_message(msg: &ChatMessage) -> Self {
        Self {
            id: msg.id.clone(),
            ts: msg.ts.clone(),
            origin: match msg.origin {
                crowdcast_protocol::Origin::Human => "human".to_string(),
                crowdcast_protocol::Origin::Bot => "bot".to_string(),
            },
            user_id: msg.user_id.clone(),
            display_name: msg.display_name.clone(),
            content: msg.content.clone(),
        }
    }
}

fn prune_window(times: &mut VecDeque<i64>, now_ms: i64, window_ms: i64) {
    while let Some(first) = times.front() {
        if now_ms - first > window_ms {
            times.pop_front();
        } else {
            break;
        }
    }
}

pub struct RoomState {
    pub room_id: String,
    max_recent: usize,
    pub recent_messages: VecDeque<RecentMessage>,
    pub budget_limit: usize,
    pub budget_window_ms: i64,
    bot_publish_times: VecDeque<i64>,
    event_times: VecDeque<i64>,
}

impl RoomState {
    fn new(room_id: &str, max_recent: usize, budget_limit: usize, budget_window_ms: i64) -> Self {
        Self {
            room_id: room_id.to_string(),
            max_recent,
            recent_messages: VecDeque::new(),
            budget_limit,
            budget_window_ms,
            bot_publish_times: VecDeque::new(),
            event_times: VecDeque::new(),
        }
    }

    pub fn add_message(&mut self, msg: &ChatMessage) {
        self.recent_messages.push_back(RecentMessage::from_message(msg));
        while self.recent_messages.len() > self.max_recent {
            self.recent_messages.pop_front();
        }
    }

    pub fn record_bot_publish(&mut self, now_ms: i64) {
        self.bot_publish_times.push_back(now_ms);
        prune_window(&mut self.bot_publish_times, now_ms, self.budget_window_ms);
    }

    pub fn within_budget(&mut self, now_ms: i64) -> bool {
        prune_window(&mut self.bot_publish_times, now_ms, self.budget_window_ms);
        self.bot_publish_times.len() < self.budget_limit
    }

    pub fn record_event(&mut self, ts_ms: i64) {
        self.event_times.push_back(ts_ms);
        prune_window(&mut self.event_times, ts_ms, EVENT_WINDOW_MS);
    }

    /// All recent events in the 10s window, bots and humans alike.
    pub fn rate_10s(&mut self, now_ms: i64) -> usize {
        prune_window(&mut self.event_times, now_ms, EVENT_WINDOW_MS);
        self.event_times.len()
    }

    pub fn recent_contents(&self, limit: usize) -> Vec<String> {
        self.recent_messages
            .iter()
            .rev()
            .take(limit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|m| {
                let who = m
                    .display_name
                    .clone()
                    .or_else(|| m.user_id.clone())
                    .unwrap_or_else(|| m.origin.clone());
                format!("{who}: {}", m.content)
            })
            .collect()
    }
}

#[derive(Default)]
pub struct PersonaRuntimeStats {
    pub last_spoke_at_ms: Option<i64>,
    pub messages_published: u64,
    mention_events: VecDeque<i64>,
}

impl PersonaRuntimeStats {
    pub fn record_mention(&mut self, ts_ms: i64) {
        self.mention_events.push_back(ts_ms);
        prune_window(&mut self.mention_events, ts_ms, MENTION_WINDOW_MS);
    }

    pub fn mentions_last_30s(&mut self, now_ms: i64) -> usize {
        prune_window(&mut self.mention_events, now_ms, MENTION_WINDOW_MS);
        self.mention_events.len()
    }
}

/// One buffered observation with its bus id and derived timestamp.
#[derive(Clone)]
pub struct ObservationEntry {
    pub bus_id: String,
    pub ts_ms: i64,
    pub observation: StreamObservation,
}

/// Auto-commentary bookkeeping: who spoke when, which observations already
/// produced messages, which summaries were recently used.
#[derive(Default)]
pub struct AutoCommentaryState {
    pub persona_last_spoke_ms: HashMap<String, i64>,
    pub room_last_spoke_ms: HashMap<String, i64>,
    room_publish_times: HashMap<String, VecDeque<i64>>,
    observation_counts: HashMap<String, VecDeque<i64>>,
    summary_seen_at_ms: HashMap<String, i64>,
    recent_personas: HashMap<String, VecDeque<String>>,
}

impl AutoCommentaryState {
    /// Momentum: max messages and minimum spacing within the window.
    pub fn momentum_ready(
        &mut self,
        room_id: &str,
        now_ms: i64,
        window_ms: i64,
        max_msgs: usize,
        min_interval_ms: i64,
    ) -> Result<(), &'static str> {
        let times = self.room_publish_times.entry(room_id.to_string()).or_default();
        prune_window(times, now_ms, window_ms);
        if times.len() >= max_msgs {
            return Err("momentum_rate");
        }
        if let Some(last) = times.back() {
            if now_ms - last < min_interval_ms {
                return Err("momentum_interval");
            }
        }
        Ok(())
    }

    pub fn room_ready(&self, room_id: &str, now_ms: i64, rate_limit_ms: i64) -> bool {
        match self.room_last_spoke_ms.get(room_id) {
            Some(last) => now_ms - last >= rate_limit_ms,
            None => true,
        }
    }

    pub fn observation_count(&mut self, obs_id: &str, now_ms: i64, window_ms: i64) -> usize {
        let times = self.observation_counts.entry(obs_id.to_string()).or_default();
        prune_window(times, now_ms, window_ms);
        times.len()
    }

    /// True when this summary hash was already used within the TTL. A fresh
    /// hash is recorded with the current time.
    pub fn summary_seen_before(&mut self, summary_hash: &str, now_ms: i64, ttl_ms: i64) -> bool {
        self.summary_seen_at_ms
            .retain(|_, seen_at| now_ms - *seen_at <= ttl_ms);
        if self.summary_seen_at_ms.contains_key(summary_hash) {
            return true;
        }
        self.summary_seen_at_ms
            .insert(summary_hash.to_string(), now_ms);
        false
    }

    pub fn recent_personas(&self, room_id: &str, last_n: usize) -> Vec<String> {
        match self.recent_personas.get(room_id) {
            Some(ring) => ring.iter().rev().take(last_n).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Record a published auto-commentary message for all gates at once.
    pub fn record_publish(&mut self, room_id: &str, persona_id: &str, obs_id: &str, now_ms: i64) {
        self.room_last_spoke_ms.insert(room_id.to_string(), now_ms);
        self.persona_last_spoke_ms
            .insert(persona_id.to_string(), now_ms);
        self.room_publish_times
            .entry(room_id.to_string())
            .or_default()
            .push_back(now_ms);
        self.observation_counts
            .entry(obs_id.to_string())
            .or_default()
            .push_back(now_ms);
        let ring = self.recent_personas.entry(room_id.to_string()).or_default();
        ring.push_back(persona_id.to_string());
        while ring.len() > 16 {
            ring.pop_front();
        }
    }
}

/// Aggregate worker state: one instance, one lock.
pub struct WorkerState {
    max_recent: usize,
    default_budget_limit: usize,
    budget_window_ms: i64,
    pub dedupe: DedupeCache,
    rooms: HashMap<String, RoomState>,
    personas: HashMap<String, PersonaRuntimeStats>,
    observations: HashMap<String, VecDeque<ObservationEntry>>,
    observation_max_age_ms: i64,
    pub auto: AutoCommentaryState,
}

impl WorkerState {
    pub fn new(
        max_recent: usize,
        dedupe_capacity: usize,
        default_budget_limit: usize,
        budget_window_ms: i64,
        observation_max_age_ms: i64,
    ) -> Self {
        Self {
            max_recent,
            default_budget_limit,
            budget_window_ms,
            dedupe: DedupeCache::new(dedupe_capacity),
            rooms: HashMap::new(),
            personas: HashMap::new(),
            observations: HashMap::new(),
            observation_max_age_ms,
            auto: AutoCommentaryState::default(),
        }
    }

    pub fn room(&mut self, room_id: &str) -> &mut RoomState {
        let (max_recent, limit, window) = (
            self.max_recent,
            self.default_budget_limit,
            self.budget_window_ms,
        );
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomState::new(room_id, max_recent, limit, window))
    }

    pub fn persona(&mut self, persona_id: &str) -> &mut PersonaRuntimeStats {
        self.personas.entry(persona_id.to_string()).or_default()
    }

    /// Buffer an observation for prompt context, pruning by age and count.
    pub fn push_observation(&mut self, entry: ObservationEntry) {
        let room_id = entry.observation.room_id.clone();
        let max_age = self.observation_max_age_ms;
        let buf = self.observations.entry(room_id).or_default();
        let newest = entry.ts_ms;
        buf.push_back(entry);
        buf.retain(|e| newest - e.ts_ms <= max_age);
        while buf.len() > OBSERVATION_BUFFER_MAX {
            buf.pop_front();
        }
    }

    pub fn observations_for(&self, room_id: &str) -> Vec<ObservationEntry> {
        self.observations
            .get(room_id)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Per-persona runtime view for the stats endpoint.
    pub fn persona_snapshots(&mut self, now_ms: i64) -> Vec<PersonaSnapshot> {
        let mut out: Vec<PersonaSnapshot> = self
            .personas
            .iter_mut()
            .map(|(persona_id, stats)| PersonaSnapshot {
                persona_id: persona_id.clone(),
                last_spoke_at_ms: stats.last_spoke_at_ms,
                messages_published: stats.messages_published,
                mentions_last_30s: stats.mentions_last_30s(now_ms),
            })
            .collect();
        out.sort_by(|a, b| a.persona_id.cmp(&b.persona_id));
        out
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PersonaSnapshot {
    pub persona_id: String,
    pub last_spoke_at_ms: Option<i64>,
    pub messages_published: u64,
    pub mentions_last_30s: usize,
}
