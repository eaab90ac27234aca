use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod auto_config;
mod auto_engine;
mod configs;
mod engine;
mod generator;
mod obs_context;
mod publisher;
mod state;
mod stats;
mod text;
mod worker;

use crowdcast_core::config::{WorkerSettings, BOT_BUDGET_WINDOW_MS};
use crowdcast_llm::{LlmProvider, PromptRenderer};
use crowdcast_memory::extract::{ExtractStrategy, MemoryExtractor};
use crowdcast_memory::{LocalMemoryStore, MemoryPolicy, MemoryStore, RemoteMemoryStore};

use worker::{MemoryRuntime, PersonaWorkerService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crowdcast_personas=info".into()),
        )
        .init();

    let settings = WorkerSettings::load()?;
    let service = Arc::new(build_service(settings)?);

    let cancel = CancellationToken::new();
    let chat_loop = tokio::spawn(service.clone().run_chat_loop(cancel.clone()));
    let observation_loop = tokio::spawn(service.clone().run_observation_loop(cancel.clone()));

    let port = service.settings.http_port;
    let router = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/stats", get(stats_handler))
        .with_state(service)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!(%addr, "crowdcast persona workers listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = chat_loop.await;
    let _ = observation_loop.await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

fn build_service(settings: WorkerSettings) -> anyhow::Result<PersonaWorkerService> {
    let room_config = configs::load_room_config(Path::new(&settings.room_config_path))?;
    let personas = configs::load_persona_configs(
        Path::new(&settings.persona_config_dir),
        &room_config.enabled_personas,
    )?;
    info!(
        room_id = %room_config.room_id,
        personas = personas.len(),
        "loaded room and persona configs"
    );

    // the provider backs both the LLM generator and LLM memory extraction
    let needs_provider = settings.generation_mode == "llm"
        || (settings.memory_enabled && settings.memory_extract_strategy == "llm");
    let (provider, renderer, max_output_chars) = if needs_provider {
        let provider_cfg =
            crowdcast_llm::load_provider_config(Path::new(&settings.llm_provider_config_path))?;
        let provider = crowdcast_llm::build_provider(&provider_cfg, Path::new("."))?;
        let renderer = Arc::new(PromptRenderer::load(
            Path::new(&settings.prompt_manifest_path),
            Path::new("."),
        )?);
        (
            Some(provider),
            Some(renderer),
            provider_cfg.max_output_chars,
        )
    } else {
        (None, None, crowdcast_llm::config::DEFAULT_MAX_OUTPUT_CHARS)
    };

    let generator: Box<dyn generator::ReplyGenerator> = if settings.generation_mode == "llm" {
        let (provider, renderer) = match (&provider, &renderer) {
            (Some(p), Some(r)) => (p.clone(), r.clone()),
            _ => anyhow::bail!("generation_mode=llm requires a provider config"),
        };
        Box::new(generator::LlmGenerator::new(
            provider,
            renderer,
            max_output_chars,
        ))
    } else {
        Box::new(generator::DeterministicGenerator::new(max_output_chars))
    };

    let auto_config = match auto_config::AutoCommentaryConfig::load(
        Path::new(&settings.auto_commentary_config_path),
        settings.auto_commentary_enabled,
    ) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(error = %e, "auto-commentary config unavailable; auto-commentary disabled");
            None
        }
    };
    let obs_context_config =
        match obs_context::ObservationContextConfig::load(Path::new(&settings.obs_context_config_path))
        {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "observation context config unavailable; using defaults");
                obs_context::ObservationContextConfig::default()
            }
        };

    let memory = build_memory(&settings, provider.clone(), renderer.clone())?;

    let observation_max_age_ms = obs_context_config.max_age_ms.max(0);
    let budget_limit = room_config
        .timing
        .max_bot_msgs_per_10s
        .unwrap_or(settings.room_bot_budget_per_10s_default);
    let state = Mutex::new(state::WorkerState::new(
        settings.max_recent_messages_per_room,
        settings.dedupe_cache_size,
        budget_limit,
        BOT_BUDGET_WINDOW_MS,
        observation_max_age_ms,
    ));

    Ok(PersonaWorkerService {
        settings,
        room_config,
        personas,
        state,
        stats: stats::WorkerStats::default(),
        generator,
        auto_config,
        obs_context_config,
        memory,
    })
}

fn build_memory(
    settings: &WorkerSettings,
    provider: Option<Arc<dyn LlmProvider>>,
    renderer: Option<Arc<PromptRenderer>>,
) -> anyhow::Result<Option<MemoryRuntime>> {
    if !settings.memory_enabled {
        return Ok(None);
    }

    let policy = MemoryPolicy::load(Path::new(&settings.memory_policy_path))?;
    let store: Arc<dyn MemoryStore> = match settings.memory_backend.as_str() {
        "remote" => {
            let Some(api_key) = settings.memory_api_key.clone() else {
                warn!("memory_backend=remote without memory_api_key; memory disabled");
                return Ok(None);
            };
            Arc::new(RemoteMemoryStore::new(
                api_key,
                &settings.memory_base_url,
                settings.memory_timeout_s,
                settings.memory_app_id.clone(),
                settings.memory_max_items,
                settings.memory_max_chars,
            )?)
        }
        _ => {
            let store = LocalMemoryStore::open(Path::new(&settings.memory_db_path))?;
            if let Some(fixtures) = &settings.memory_fixtures_path {
                if let Err(e) = store.load_fixtures(Path::new(fixtures)) {
                    warn!(error = %e, "failed to load memory fixtures");
                }
            }
            Arc::new(store)
        }
    };

    let strategy = ExtractStrategy::parse(&settings.memory_extract_strategy);
    let extractor = MemoryExtractor::new(
        policy,
        strategy,
        provider,
        renderer,
        settings.memory_max_items,
        settings.memory_scope_user_enabled,
    );

    Ok(Some(MemoryRuntime {
        store,
        extractor,
        max_items: settings.memory_max_items,
        max_chars: settings.memory_max_chars,
    }))
}

async fn healthz_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn stats_handler(State(service): State<Arc<PersonaWorkerService>>) -> Json<Value> {
    let enabled: Vec<String> = service.personas.keys().cloned().collect();
    let now_ms = chrono::Utc::now().timestamp_millis();
    let persona_state = service.state.lock().unwrap().persona_snapshots(now_ms);
    let extra = json!({
        "personas": persona_state,
        "generation": service.generator.describe(),
        "auto_commentary_enabled": service
            .auto_config
            .as_ref()
            .map(|c| c.enabled)
            .unwrap_or(false),
        "memory_enabled": service.memory.is_some(),
        "memory_backend": service.memory.as_ref().map(|m| m.store.describe()),
        "memory_extract_strategy": service
            .memory
            .as_ref()
            .map(|m| m.extractor.strategy().as_str()),
        "firehose_stream": &service.settings.firehose_stream,
        "observations_stream": &service.settings.stream_observations_key,
        "consumer_group": &service.settings.consumer_group,
    });
    Json(service.stats.as_json(&enabled, &service.room_config.room_id, extra))
}
