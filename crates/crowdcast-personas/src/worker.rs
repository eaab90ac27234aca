//! The persona worker service: firehose and observation consume loops.
//!
//! One service instance owns all runtime state behind a single mutex. The
//! lock is never held across an await: each persona is evaluated under the
//! lock, the reply is generated and published without it, and the
//! cooldown/budget updates re-take it only after a successful append.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crowdcast_bus::{Backoff, BusEntry, StreamBus};
use crowdcast_core::config::WorkerSettings;
use crowdcast_memory::extract::{ExtractContext, MemoryExtractor};
use crowdcast_memory::MemoryStore;
use crowdcast_protocol::{validate, ChatMessage, StreamObservation};

use crate::auto_config::AutoCommentaryConfig;
use crate::auto_engine;
use crate::configs::{PersonaConfig, RoomConfig};
use crate::engine::{self, GateParams};
use crate::generator::{ReplyGenerator, ReplyInput, ReplyPurpose};
use crate::obs_context::{format_observation_context, ObservationContextConfig};
use crate::publisher;
use crate::state::{ObservationEntry, WorkerState};
use crate::stats::WorkerStats;

const READ_COUNT: usize = 20;
const READ_BLOCK_MS: usize = 1000;
const RECENT_FOR_PROMPT: usize = 5;
const PRODUCER: &str = "persona_worker";

#[derive(Clone, Copy)]
enum ConsumedStream {
    Firehose,
    Observations,
}

pub struct MemoryRuntime {
    pub store: Arc<dyn MemoryStore>,
    pub extractor: MemoryExtractor,
    pub max_items: usize,
    pub max_chars: usize,
}

pub struct PersonaWorkerService {
    pub settings: WorkerSettings,
    pub room_config: RoomConfig,
    pub personas: BTreeMap<String, PersonaConfig>,
    pub state: Mutex<WorkerState>,
    pub stats: WorkerStats,
    pub generator: Box<dyn ReplyGenerator>,
    pub auto_config: Option<AutoCommentaryConfig>,
    pub obs_context_config: ObservationContextConfig,
    pub memory: Option<MemoryRuntime>,
}

impl PersonaWorkerService {
    fn gate_params(&self) -> GateParams {
        let timing = &self.room_config.timing;
        GateParams {
            max_react_age_s: timing
                .max_react_age_s
                .unwrap_or(self.settings.max_react_age_s),
            soft_cooldown_ms: timing
                .soft_cooldown_ms
                .unwrap_or(self.settings.persona_cooldown_ms_default),
            hard_cooldown_ms: timing.hard_cooldown_ms,
            p_base: self.settings.p_base,
            p_mention_bonus: self.settings.p_mention_bonus,
            p_hype_bonus: self.settings.p_hype_bonus,
            p_rate_penalty_per_msg: self.settings.p_rate_penalty_per_msg,
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// The firehose loop: chat messages in, persona replies out.
    pub async fn run_chat_loop(self: Arc<Self>, cancel: CancellationToken) {
        let stream = self.settings.firehose_stream.clone();
        self.consume_stream(&stream, ConsumedStream::Firehose, cancel)
            .await;
    }

    /// The observations loop: perceiver output in, auto-commentary out.
    pub async fn run_observation_loop(self: Arc<Self>, cancel: CancellationToken) {
        let stream = self.settings.stream_observations_key.clone();
        self.consume_stream(&stream, ConsumedStream::Observations, cancel)
            .await;
    }

    async fn consume_stream(
        self: &Arc<Self>,
        stream: &str,
        kind: ConsumedStream,
        cancel: CancellationToken,
    ) {
        let mut backoff = Backoff::new();
        let mut bus: Option<StreamBus> = None;

        while !cancel.is_cancelled() {
            if bus.is_none() {
                match self.connect(stream).await {
                    Ok(handle) => {
                        backoff.reset();
                        bus = Some(handle);
                    }
                    Err(e) => {
                        warn!(stream, error = %e, delay = ?backoff.current(), "broker connect failed; backing off");
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
                    stream,
                    &self.settings.consumer_group,
                    &self.settings.consumer_name,
                    READ_COUNT,
                    READ_BLOCK_MS,
                )
                .await
            {
                Ok(entries) => entries,
                Err(e) if e.is_connection() => {
                    warn!(stream, error = %e, "broker connection lost; reconnecting");
                    bus = None;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = backoff.sleep() => {}
                    }
                    continue;
                }
                Err(e) => {
                    error!(stream, error = %e, "read loop error");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                    }
                    continue;
                }
            };
            backoff.reset();

            for entry in entries {
                match kind {
                    ConsumedStream::Firehose => self.handle_chat_entry(handle, entry).await,
                    ConsumedStream::Observations => {
                        self.handle_observation_entry(handle, entry).await
                    }
                }
            }
        }
        info!(stream, "consume loop stopped");
    }

    async fn connect(&self, stream: &str) -> Result<StreamBus, crowdcast_bus::BusError> {
        let mut bus = StreamBus::connect(&self.settings.redis_url).await?;
        bus.ensure_group(stream, &self.settings.consumer_group).await?;
        info!(stream, "worker connected to broker");
        Ok(bus)
    }

    async fn handle_chat_entry(&self, bus: &mut StreamBus, entry: BusEntry) {
        let stream = self.settings.firehose_stream.clone();
        let group = self.settings.consumer_group.clone();

        self.process_chat_entry(bus, &entry).await;

        bus.ack(&stream, &group, &entry.id).await;
    }

    async fn process_chat_entry(&self, bus: &mut StreamBus, entry: &BusEntry) {
        let msg: ChatMessage = match serde_json::from_str(&entry.data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(entry = %entry.id, error = %e, "malformed firehose JSON");
                return;
            }
        };
        self.stats.messages_consumed.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.state.lock().unwrap();
            if state.dedupe.seen_before(&msg.id) {
                self.stats.messages_deduped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        if let Err(e) = validate::validate_chat_message(&msg) {
            warn!(entry = %entry.id, error = %e, "invalid firehose message");
            return;
        }

        let now_ms = Self::now_ms();
        let recent_for_prompt;
        {
            let mut state = self.state.lock().unwrap();
            let room = state.room(&msg.room_id);
            room.record_event(now_ms);
            room.add_message(&msg);
            recent_for_prompt = room.recent_contents(RECENT_FOR_PROMPT);
        }

        if !msg.is_bot() {
            self.maybe_extract_memory(&msg, &recent_for_prompt).await;
        }

        let params = self.gate_params();
        let config_room = Some(self.room_config.room_id.as_str());

        for (persona_id, persona) in &self.personas {
            let decision = {
                let mut state = self.state.lock().unwrap();
                engine::evaluate(&msg, persona, config_room, &mut state, &params, now_ms)
            };

            match decision.reason {
                "cooldown" => {
                    self.stats
                        .messages_suppressed_cooldown
                        .fetch_add(1, Ordering::Relaxed);
                }
                "budget" => {
                    self.stats
                        .messages_suppressed_budget
                        .fetch_add(1, Ordering::Relaxed);
                }
                "bot_origin" => {
                    self.stats
                        .messages_suppressed_bot_origin
                        .fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
            let tags = serde_json::to_value(&decision.tags).unwrap_or(json!({}));
            self.stats
                .record_decision(persona_id, decision.reason, Some(tags.clone()));

            if !decision.emit {
                continue;
            }

            let memory_context = self.memory_context_for(persona_id, &msg).await;
            let observation_context = {
                let state = self.state.lock().unwrap();
                let entries = state.observations_for(&msg.room_id);
                format_observation_context(&entries, &msg.room_id, now_ms, &self.obs_context_config)
                    .context_text
            };

            let input = ReplyInput {
                persona,
                room: &self.room_config,
                event_id: msg.id.clone(),
                content: msg.content.clone(),
                purpose: ReplyPurpose::PersonaReply,
                forced_reason: (decision.reason == "e2e_forced").then_some("e2e_forced"),
                tags,
                recent_messages: recent_for_prompt.clone(),
                memory_context,
                observation_context,
                observation_summary: String::new(),
                prompt_id: self.settings.chat_reply_prompt_id.clone(),
            };
            let reply = match self.generator.generate(&input).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(persona_id = %persona_id, error = %e, "reply generation failed");
                    continue;
                }
            };

            let message = publisher::build_bot_message(
                persona,
                &msg.room_id,
                &reply,
                &self.settings.consumer_name,
                PRODUCER,
            );
            let published =
                publisher::publish_chat_message(bus, &self.settings.ingest_stream, &message).await;

            if published {
                let publish_ms = Self::now_ms();
                let mut state = self.state.lock().unwrap();
                let persona_stats = state.persona(persona_id);
                persona_stats.last_spoke_at_ms = Some(publish_ms);
                persona_stats.messages_published += 1;
                state.room(&msg.room_id).record_bot_publish(publish_ms);
                self.stats.messages_published.fetch_add(1, Ordering::Relaxed);
            } else {
                warn!(persona_id = %persona_id, "failed to publish reply");
            }
        }
    }

    /// Best-effort memory search for prompt context; failures only touch the
    /// counters.
    async fn memory_context_for(&self, persona_id: &str, msg: &ChatMessage) -> String {
        let Some(memory) = &self.memory else {
            return String::new();
        };
        let scope_key = format!("{}:{persona_id}", msg.room_id);
        self.stats
            .memory_reads_attempted
            .fetch_add(1, Ordering::Relaxed);
        match memory
            .store
            .search(&scope_key, &msg.content, memory.max_items)
            .await
        {
            Ok(result) => {
                self.stats
                    .memory_reads_succeeded
                    .fetch_add(1, Ordering::Relaxed);
                let mut block = String::new();
                for item in &result.items {
                    let line = format!("- {}: {}\n", item.subject, item.value);
                    if block.len() + line.len() > memory.max_chars {
                        break;
                    }
                    block.push_str(&line);
                }
                block.trim_end().to_string()
            }
            Err(e) => {
                self.stats
                    .memory_reads_failed
                    .fetch_add(1, Ordering::Relaxed);
                self.stats.record_memory_error(e.to_string());
                String::new()
            }
        }
    }

    /// Extract and store memory items from human chat.
    ///
    /// The rejected counter keeps its historical quirk: when no item was
    /// accepted and no per-item rejection moved the counter, it is bumped
    /// once more anyway.
    async fn maybe_extract_memory(&self, msg: &ChatMessage, recent: &[String]) {
        let Some(memory) = &self.memory else { return };

        self.stats
            .memory_writes_attempted
            .fetch_add(1, Ordering::Relaxed);
        let rejected_before = self.stats.memory_writes_rejected.load(Ordering::Relaxed);

        let ctx = ExtractContext {
            content: msg.content.clone(),
            room_id: msg.room_id.clone(),
            persona_id: self.personas.keys().next().cloned(),
            user_id: msg.user_id.clone(),
            display_name: msg.display_name.clone(),
            message_id: Some(msg.id.clone()),
            origin: Some("human".to_string()),
            recent_messages: recent.to_vec(),
            marker: None,
        };
        let outcome = memory.extractor.extract(&ctx).await;

        self.stats
            .memory_writes_rejected
            .fetch_add(outcome.rejected as u64, Ordering::Relaxed);
        self.stats
            .memory_writes_redacted
            .fetch_add(outcome.redacted as u64, Ordering::Relaxed);
        if let Some(err) = &outcome.error {
            self.stats.record_memory_error(err.clone());
        }

        for item in &outcome.accepted {
            match memory.store.upsert(&item.scope_key, item).await {
                Ok(()) => {
                    self.stats
                        .memory_writes_accepted
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats
                        .memory_writes_failed
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats.record_memory_error(e.to_string());
                }
            }
        }

        let rejected_now = self.stats.memory_writes_rejected.load(Ordering::Relaxed);
        if outcome.accepted.is_empty() && rejected_before == rejected_now {
            self.stats
                .memory_writes_rejected
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn handle_observation_entry(&self, bus: &mut StreamBus, entry: BusEntry) {
        let stream = self.settings.stream_observations_key.clone();
        let group = self.settings.consumer_group.clone();

        self.process_observation_entry(bus, &entry).await;

        bus.ack(&stream, &group, &entry.id).await;
    }

    async fn process_observation_entry(&self, bus: &mut StreamBus, entry: &BusEntry) {
        let obs: StreamObservation = match serde_json::from_str(&entry.data) {
            Ok(obs) => obs,
            Err(e) => {
                warn!(entry = %entry.id, error = %e, "malformed observation JSON");
                return;
            }
        };
        self.stats
            .observations_consumed
            .fetch_add(1, Ordering::Relaxed);
        if let Err(e) = validate::validate_stream_observation(&obs) {
            warn!(entry = %entry.id, error = %e, "invalid observation");
            return;
        }

        let ts_ms = obs
            .ts_ms()
            .or_else(|| entry.id.split('-').next().and_then(|p| p.parse().ok()))
            .unwrap_or_else(Self::now_ms);

        {
            let mut state = self.state.lock().unwrap();
            state.push_observation(ObservationEntry {
                bus_id: entry.id.clone(),
                ts_ms,
                observation: obs.clone(),
            });
        }

        let Some(auto_cfg) = &self.auto_config else { return };
        if !auto_cfg.enabled {
            return;
        }

        let now_ms = Self::now_ms();
        let enabled: Vec<String> = self.personas.keys().cloned().collect();

        let (check, picked) = {
            let mut state = self.state.lock().unwrap();
            let check = auto_engine::should_emit(&obs, &mut state.auto, auto_cfg, now_ms);
            if !check.emit {
                (check, None)
            } else {
                let (winner, pick_reason) =
                    auto_engine::pick_persona(&obs, &state.auto, auto_cfg, &enabled);
                (check, winner.map(|w| (w, pick_reason)))
            }
        };

        if !check.emit {
            self.stats.record_decision(
                "auto_commentary",
                check.reason,
                Some(json!({"obs_id": obs.id, "interest_score": check.score, "ts_ms": now_ms})),
            );
            return;
        }
        let Some((persona_id, pick_reason)) = picked else {
            self.stats.record_decision("auto_commentary", "no_persona", None);
            return;
        };

        // the selected persona still honours its own auto cadence
        {
            let state = self.state.lock().unwrap();
            if let Some(last) = state.auto.persona_last_spoke_ms.get(&persona_id) {
                if now_ms - last < auto_cfg.persona_cooldown_ms {
                    self.stats.record_decision(
                        &persona_id,
                        "persona_rate",
                        Some(json!({"obs_id": obs.id, "ts_ms": now_ms})),
                    );
                    return;
                }
            }
        }

        let Some(persona) = self.personas.get(&persona_id) else {
            return;
        };

        let (observation_context, recent_for_prompt) = {
            let mut state = self.state.lock().unwrap();
            let entries = state.observations_for(&obs.room_id);
            let context =
                format_observation_context(&entries, &obs.room_id, now_ms, &self.obs_context_config)
                    .context_text;
            let recent = state.room(&obs.room_id).recent_contents(RECENT_FOR_PROMPT);
            (context, recent)
        };

        let input = ReplyInput {
            persona,
            room: &self.room_config,
            event_id: obs.id.clone(),
            content: obs.summary.clone(),
            purpose: ReplyPurpose::AutoCommentary,
            forced_reason: None,
            tags: json!({"interest_score": check.score, "pick_reason": pick_reason}),
            recent_messages: recent_for_prompt,
            memory_context: String::new(),
            observation_context,
            observation_summary: obs.summary.clone(),
            prompt_id: None,
        };
        let reply = match self.generator.generate(&input).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(persona_id = %persona_id, error = %e, "auto-commentary generation failed");
                return;
            }
        };

        let mut content = format!("{}{}", auto_cfg.message_prefix, reply);
        if auto_cfg.include_obs_id {
            content.push_str(&format!(" [obs:{}]", obs.id));
        }
        let content = crowdcast_llm::text::truncate_chars(&content, auto_cfg.max_reply_chars);

        let message = publisher::build_bot_message(
            persona,
            &obs.room_id,
            &content,
            &self.settings.consumer_name,
            PRODUCER,
        );
        let published =
            publisher::publish_chat_message(bus, &self.settings.ingest_stream, &message).await;

        if published {
            let mut state = self.state.lock().unwrap();
            state
                .auto
                .record_publish(&obs.room_id, &persona_id, &obs.id, Self::now_ms());
            self.stats
                .auto_messages_published
                .fetch_add(1, Ordering::Relaxed);
            self.stats.record_decision(
                &persona_id,
                pick_reason,
                Some(json!({"obs_id": obs.id, "interest_score": check.score, "ts_ms": now_ms})),
            );
        } else {
            warn!(persona_id = %persona_id, "failed to publish auto-commentary");
        }
    }
}
