//! Per-service settings.
//!
//! Every service is configured from the environment: defaults below, any
//! field overridable by the same-named (upper-case) environment variable,
//! e.g. `REDIS_URL`, `FIREHOSE_STREAM`, `CONTENT_MAX_LENGTH`.

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";
pub const DEFAULT_INGEST_STREAM: &str = "stream:chat.ingest";
pub const DEFAULT_FIREHOSE_STREAM: &str = "stream:chat.firehose";
pub const DEFAULT_FRAMES_STREAM: &str = "stream:frames";
pub const DEFAULT_TRANSCRIPTS_STREAM: &str = "stream:transcripts";
pub const DEFAULT_OBSERVATIONS_STREAM: &str = "stream:observations";
pub const DEFAULT_ROOM: &str = "room:demo";

/// Sliding window for the per-room bot publish budget.
pub const BOT_BUDGET_WINDOW_MS: i64 = 10_000;

fn extract<T: for<'de> Deserialize<'de> + Serialize + Default>() -> Result<T> {
    Figment::from(Serialized::defaults(T::default()))
        .merge(Env::raw())
        .extract()
        .map_err(|e| CoreError::Config(e.to_string()))
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker-local".to_string())
}

/// Chat gateway: ingest consumer, safety pipeline, WebSocket fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    pub redis_url: String,
    pub ingest_stream: String,
    pub firehose_stream: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub port: u16,
    pub moderation_config: Option<String>,
    pub content_max_length: usize,
    pub subscribe_timeout_s: f64,
    pub broadcast_queue_size: usize,
    pub default_room: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            ingest_stream: DEFAULT_INGEST_STREAM.to_string(),
            firehose_stream: DEFAULT_FIREHOSE_STREAM.to_string(),
            consumer_group: "chat_gateway".to_string(),
            consumer_name: hostname(),
            port: 8080,
            moderation_config: None,
            content_max_length: 200,
            subscribe_timeout_s: 2.0,
            broadcast_queue_size: 2000,
            default_room: DEFAULT_ROOM.to_string(),
        }
    }
}

impl GatewaySettings {
    pub fn load() -> Result<Self> {
        extract()
    }
}

/// Persona workers: firehose + observations consumers, decision engines,
/// reply generation, optional memory layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub redis_url: String,
    pub firehose_stream: String,
    pub ingest_stream: String,
    pub stream_observations_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub http_port: u16,

    pub room_config_path: String,
    pub persona_config_dir: String,

    /// "deterministic" or "llm".
    pub generation_mode: String,
    pub llm_provider_config_path: String,
    pub prompt_manifest_path: String,
    pub chat_reply_prompt_id: Option<String>,

    pub max_recent_messages_per_room: usize,
    pub dedupe_cache_size: usize,
    pub max_react_age_s: f64,
    pub persona_cooldown_ms_default: i64,
    pub room_bot_budget_per_10s_default: usize,

    pub p_base: f64,
    pub p_mention_bonus: f64,
    pub p_hype_bonus: f64,
    pub p_rate_penalty_per_msg: f64,

    pub auto_commentary_config_path: String,
    pub obs_context_config_path: String,
    pub auto_commentary_enabled: Option<bool>,

    pub memory_enabled: bool,
    /// "local" or "remote".
    pub memory_backend: String,
    pub memory_policy_path: String,
    pub memory_db_path: String,
    pub memory_fixtures_path: Option<String>,
    pub memory_max_items: usize,
    pub memory_max_chars: usize,
    /// "heuristic" or "llm".
    pub memory_extract_strategy: String,
    pub memory_scope_user_enabled: bool,
    pub memory_api_key: Option<String>,
    pub memory_base_url: String,
    pub memory_app_id: Option<String>,
    pub memory_timeout_s: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            firehose_stream: DEFAULT_FIREHOSE_STREAM.to_string(),
            ingest_stream: DEFAULT_INGEST_STREAM.to_string(),
            stream_observations_key: DEFAULT_OBSERVATIONS_STREAM.to_string(),
            consumer_group: "persona_workers".to_string(),
            consumer_name: hostname(),
            http_port: 8090,
            room_config_path: "configs/rooms/demo.json".to_string(),
            persona_config_dir: "configs/personas".to_string(),
            generation_mode: "deterministic".to_string(),
            llm_provider_config_path: "configs/llm/providers/stub.json".to_string(),
            prompt_manifest_path: "prompts/manifest.json".to_string(),
            chat_reply_prompt_id: None,
            max_recent_messages_per_room: 50,
            dedupe_cache_size: 1000,
            max_react_age_s: 20.0,
            persona_cooldown_ms_default: 1500,
            room_bot_budget_per_10s_default: 5,
            p_base: 0.15,
            p_mention_bonus: 0.35,
            p_hype_bonus: 0.20,
            p_rate_penalty_per_msg: 0.02,
            auto_commentary_config_path: "configs/auto_commentary/default.json".to_string(),
            obs_context_config_path: "configs/observation_context/default.json".to_string(),
            auto_commentary_enabled: None,
            memory_enabled: false,
            memory_backend: "local".to_string(),
            memory_policy_path: "configs/memory/default_policy.json".to_string(),
            memory_db_path: "data/memory/crowdcast.db".to_string(),
            memory_fixtures_path: None,
            memory_max_items: 5,
            memory_max_chars: 800,
            memory_extract_strategy: "heuristic".to_string(),
            memory_scope_user_enabled: false,
            memory_api_key: None,
            memory_base_url: "https://api.memstore.example".to_string(),
            memory_app_id: None,
            memory_timeout_s: 10,
        }
    }
}

impl WorkerSettings {
    pub fn load() -> Result<Self> {
        extract()
    }
}

/// Stream perceiver: frames + transcripts join, observation emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceiverSettings {
    pub redis_url: String,
    pub stream_frames_key: String,
    pub stream_transcripts_key: String,
    pub stream_observations_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub http_port: u16,

    pub llm_provider_config_path: String,
    pub prompt_manifest_path: String,
    pub observation_prompt_id: String,

    /// Root against which `frame_path` values (and the `/app/` alias) resolve.
    pub repo_root: String,
    pub transcript_buffer_retention_ms: i64,
    pub transcript_join_window_ms: i64,
}

impl Default for PerceiverSettings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            stream_frames_key: DEFAULT_FRAMES_STREAM.to_string(),
            stream_transcripts_key: DEFAULT_TRANSCRIPTS_STREAM.to_string(),
            stream_observations_key: DEFAULT_OBSERVATIONS_STREAM.to_string(),
            consumer_group: "stream_perceiver".to_string(),
            consumer_name: hostname(),
            http_port: 8100,
            llm_provider_config_path: "configs/llm/providers/stub.json".to_string(),
            prompt_manifest_path: "prompts/manifest.json".to_string(),
            observation_prompt_id: "stream_observation_v1".to_string(),
            repo_root: ".".to_string(),
            transcript_buffer_retention_ms: 120_000,
            transcript_join_window_ms: 30_000,
        }
    }
}

impl PerceiverSettings {
    pub fn load() -> Result<Self> {
        extract()
    }
}
