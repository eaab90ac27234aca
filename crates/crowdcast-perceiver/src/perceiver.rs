//! Frame + transcript perception.
//!
//! Frames and transcripts arrive on separate streams under one consumer
//! group. Transcripts accumulate in per-room rings pruned behind an
//! advancing watermark; each valid frame is integrity-checked against its
//! SHA-256, joined with nearby transcripts, sent to the provider, and the
//! returned observation is cross-checked against the exact inputs before it
//! may reach the observations stream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crowdcast_bus::{Backoff, BusEntry, StreamBus};
use crowdcast_core::config::PerceiverSettings;
use crowdcast_llm::config::ProviderKind;
use crowdcast_llm::{LlmProvider, LlmRequest, PromptRenderer};
use crowdcast_protocol::{validate, StreamFrame, StreamObservation, StreamTranscriptSegment};

const READ_COUNT: usize = 50;
const READ_BLOCK_MS: usize = 1000;

#[derive(Default)]
pub struct PerceiverStats {
    pub processed_frames: AtomicU64,
    pub processed_transcripts: AtomicU64,
    pub emitted_observations: AtomicU64,
    pub llm_calls: AtomicU64,
    pub llm_failures: AtomicU64,
    pub schema_failures: AtomicU64,
    pub sha_mismatch: AtomicU64,
    pub file_missing: AtomicU64,
    pub bus_failures: AtomicU64,
}

impl PerceiverStats {
    pub fn as_json(&self) -> Value {
        json!({
            "processed_frames": self.processed_frames.load(Ordering::Relaxed),
            "processed_transcripts": self.processed_transcripts.load(Ordering::Relaxed),
            "emitted_observations": self.emitted_observations.load(Ordering::Relaxed),
            "llm_calls": self.llm_calls.load(Ordering::Relaxed),
            "llm_failures": self.llm_failures.load(Ordering::Relaxed),
            "schema_failures": self.schema_failures.load(Ordering::Relaxed),
            "sha_mismatch": self.sha_mismatch.load(Ordering::Relaxed),
            "file_missing": self.file_missing.load(Ordering::Relaxed),
            "bus_failures": self.bus_failures.load(Ordering::Relaxed),
        })
    }
}

struct BufferedSegment {
    ts_ms: i64,
    segment: StreamTranscriptSegment,
}

/// Per-room transcript rings plus the watermark that prunes them.
#[derive(Default)]
struct TranscriptBuffers {
    watermark_ms: HashMap<String, i64>,
    segments: HashMap<String, Vec<BufferedSegment>>,
}

impl TranscriptBuffers {
    fn advance_watermark(&mut self, room_id: &str, ts_ms: i64) {
        let watermark = self.watermark_ms.entry(room_id.to_string()).or_insert(ts_ms);
        *watermark = (*watermark).max(ts_ms);
    }

    fn prune(&mut self, room_id: &str, retention_ms: i64) {
        let Some(watermark) = self.watermark_ms.get(room_id).copied() else {
            return;
        };
        let cutoff = watermark - retention_ms;
        if let Some(buf) = self.segments.get_mut(room_id) {
            buf.retain(|s| s.ts_ms >= cutoff);
        }
    }

    fn record(&mut self, segment: StreamTranscriptSegment, retention_ms: i64) {
        let room_id = segment.room_id.clone();
        let ts_ms = segment.ts_ms().unwrap_or(0);
        self.advance_watermark(&room_id, ts_ms);
        let buf = self.segments.entry(room_id.clone()).or_default();
        buf.push(BufferedSegment { ts_ms, segment });
        buf.sort_by(|a, b| a.ts_ms.cmp(&b.ts_ms).then_with(|| a.segment.id.cmp(&b.segment.id)));
        self.prune(&room_id, retention_ms);
    }

    /// Segments within `window_ms` of the frame timestamp, ordered by
    /// `(ts_ms, id)`.
    fn join(&self, room_id: &str, frame_ts_ms: i64, window_ms: i64) -> Vec<StreamTranscriptSegment> {
        let Some(buf) = self.segments.get(room_id) else {
            return Vec::new();
        };
        buf.iter()
            .filter(|s| (s.ts_ms - frame_ts_ms).abs() <= window_ms)
            .map(|s| s.segment.clone())
            .collect()
    }
}

/// Resolve a frame path against the repo root, honouring the `/app/` alias
/// used by containerized producers.
pub fn resolve_frame_path(frame_path: &str, repo_root: &Path) -> PathBuf {
    let raw = frame_path.trim();
    if raw.is_empty() {
        return repo_root.to_path_buf();
    }
    if let Some(rel) = raw.strip_prefix("/app/") {
        return repo_root.join(rel);
    }
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    repo_root.join(raw)
}

/// Streaming SHA-256 of a file's bytes.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Why a frame produced no observation.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameSkip {
    Invalid(String),
    FileMissing,
    ShaMismatch,
}

/// Parse and cross-check the provider's response against the exact frame and
/// transcript set that was sent.
pub fn parse_observation_response(
    text: &str,
    frame: &StreamFrame,
    transcripts: &[StreamTranscriptSegment],
) -> Result<StreamObservation, String> {
    let observation: StreamObservation =
        serde_json::from_str(text).map_err(|e| format!("observation parse error: {e}"))?;

    if observation.room_id != frame.room_id {
        return Err("observation.room_id mismatch".to_string());
    }
    if observation.frame_id != frame.id {
        return Err("observation.frame_id mismatch".to_string());
    }
    if !observation.frame_sha256.eq_ignore_ascii_case(&frame.sha256) {
        return Err("observation.frame_sha256 mismatch".to_string());
    }
    let expected_ids: Vec<&str> = transcripts.iter().map(|s| s.id.as_str()).collect();
    let actual_ids: Vec<&str> = observation.transcript_ids.iter().map(String::as_str).collect();
    if expected_ids != actual_ids {
        return Err("observation.transcript_ids mismatch".to_string());
    }

    validate::validate_stream_observation(&observation).map_err(|e| e.to_string())?;
    Ok(observation)
}

pub struct StreamPerceiver {
    pub settings: PerceiverSettings,
    pub stats: PerceiverStats,
    provider: Arc<dyn LlmProvider>,
    provider_kind: ProviderKind,
    provider_model: String,
    renderer: PromptRenderer,
    prompt_sha256: String,
    repo_root: PathBuf,
    buffers: Mutex<TranscriptBuffers>,
}

impl StreamPerceiver {
    pub fn new(settings: PerceiverSettings) -> anyhow::Result<Self> {
        let repo_root = PathBuf::from(&settings.repo_root);

        let provider_cfg = crowdcast_llm::load_provider_config(Path::new(
            &settings.llm_provider_config_path,
        ))?;
        let provider = crowdcast_llm::build_provider(&provider_cfg, &repo_root)?;
        let provider_model = provider
            .describe()
            .model
            .unwrap_or_else(|| "unknown".to_string());

        let renderer = PromptRenderer::load(
            Path::new(&settings.prompt_manifest_path),
            &repo_root,
        )?;
        let prompt_sha256 = renderer
            .entry(&settings.observation_prompt_id)
            .map(|entry| entry.sha256.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "prompt id {} not found in manifest",
                    settings.observation_prompt_id
                )
            })?;

        Ok(Self {
            settings,
            stats: PerceiverStats::default(),
            provider,
            provider_kind: provider_cfg.provider,
            provider_model,
            renderer,
            prompt_sha256,
            repo_root,
            buffers: Mutex::new(TranscriptBuffers::default()),
        })
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let frames = self.settings.stream_frames_key.clone();
        let transcripts = self.settings.stream_transcripts_key.clone();
        let streams = [transcripts.as_str(), frames.as_str()];
        let mut backoff = Backoff::new();
        let mut bus: Option<StreamBus> = None;

        while !cancel.is_cancelled() {
            if bus.is_none() {
                match self.connect(&streams).await {
                    Ok(handle) => {
                        backoff.reset();
                        bus = Some(handle);
                    }
                    Err(e) => {
                        self.stats.bus_failures.fetch_add(1, Ordering::Relaxed);
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
                .read_any(
                    &streams,
                    &self.settings.consumer_group,
                    &self.settings.consumer_name,
                    READ_COUNT,
                    READ_BLOCK_MS,
                )
                .await
            {
                Ok(entries) => entries,
                Err(e) if e.is_connection() => {
                    self.stats.bus_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "broker connection lost; reconnecting");
                    bus = None;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = backoff.sleep() => {}
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "perceiver read failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                    }
                    continue;
                }
            };
            backoff.reset();

            for (stream_name, entry) in entries {
                self.handle_entry(handle, &stream_name, entry).await;
            }
        }
        info!("perceiver loop stopped");
    }

    async fn connect(&self, streams: &[&str]) -> Result<StreamBus, crowdcast_bus::BusError> {
        let mut bus = StreamBus::connect(&self.settings.redis_url).await?;
        for stream in streams {
            bus.ensure_group(stream, &self.settings.consumer_group).await?;
        }
        info!(url = %self.settings.redis_url, "perceiver connected to broker");
        Ok(bus)
    }

    async fn handle_entry(&self, bus: &mut StreamBus, stream_name: &str, entry: BusEntry) {
        if stream_name == self.settings.stream_transcripts_key {
            self.handle_transcript(&entry);
        } else if stream_name == self.settings.stream_frames_key {
            self.handle_frame(bus, &entry).await;
        } else {
            warn!(stream = stream_name, entry = %entry.id, "entry from unknown stream");
        }

        // terminal in every case
        bus.ack(stream_name, &self.settings.consumer_group, &entry.id)
            .await;
    }

    fn handle_transcript(&self, entry: &BusEntry) {
        self.stats
            .processed_transcripts
            .fetch_add(1, Ordering::Relaxed);
        let segment: StreamTranscriptSegment = match serde_json::from_str(&entry.data) {
            Ok(segment) => segment,
            Err(e) => {
                self.stats.schema_failures.fetch_add(1, Ordering::Relaxed);
                warn!(entry = %entry.id, error = %e, "malformed transcript JSON");
                return;
            }
        };
        if let Err(e) = validate::validate_transcript_segment(&segment) {
            self.stats.schema_failures.fetch_add(1, Ordering::Relaxed);
            warn!(entry = %entry.id, error = %e, "invalid transcript segment");
            return;
        }
        self.buffers
            .lock()
            .unwrap()
            .record(segment, self.settings.transcript_buffer_retention_ms);
    }

    async fn handle_frame(&self, bus: &mut StreamBus, entry: &BusEntry) {
        self.stats.processed_frames.fetch_add(1, Ordering::Relaxed);
        let frame: StreamFrame = match serde_json::from_str(&entry.data) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.schema_failures.fetch_add(1, Ordering::Relaxed);
                warn!(entry = %entry.id, error = %e, "malformed frame JSON");
                return;
            }
        };

        let transcripts = match self.prepare_frame(&frame) {
            Ok(transcripts) => transcripts,
            Err(FrameSkip::Invalid(reason)) => {
                self.stats.schema_failures.fetch_add(1, Ordering::Relaxed);
                warn!(entry = %entry.id, %reason, "invalid frame");
                return;
            }
            Err(FrameSkip::FileMissing) => {
                self.stats.file_missing.fetch_add(1, Ordering::Relaxed);
                warn!(entry = %entry.id, path = %frame.frame_path, "frame file missing");
                return;
            }
            Err(FrameSkip::ShaMismatch) => {
                self.stats.sha_mismatch.fetch_add(1, Ordering::Relaxed);
                warn!(entry = %entry.id, path = %frame.frame_path, "frame content hash mismatch");
                return;
            }
        };

        let Some(observation) = self.perceive(&frame, &transcripts).await else {
            return;
        };

        let json = match serde_json::to_string(&observation) {
            Ok(json) => json,
            Err(e) => {
                self.stats.schema_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "failed to serialize observation");
                return;
            }
        };
        match bus
            .append(&self.settings.stream_observations_key, &json)
            .await
        {
            Ok(_) => {
                self.stats
                    .emitted_observations
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.bus_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "failed to append observation");
            }
        }
    }

    /// Validate the frame, check the file's integrity, and join transcripts.
    fn prepare_frame(
        &self,
        frame: &StreamFrame,
    ) -> Result<Vec<StreamTranscriptSegment>, FrameSkip> {
        validate::validate_stream_frame(frame).map_err(|e| FrameSkip::Invalid(e.to_string()))?;

        let ts_ms = frame.ts_ms().unwrap_or(0);
        {
            let mut buffers = self.buffers.lock().unwrap();
            buffers.advance_watermark(&frame.room_id, ts_ms);
            buffers.prune(&frame.room_id, self.settings.transcript_buffer_retention_ms);
        }

        let resolved = resolve_frame_path(&frame.frame_path, &self.repo_root);
        if !resolved.exists() {
            return Err(FrameSkip::FileMissing);
        }
        let actual_sha = sha256_file(&resolved)
            .map_err(|e| FrameSkip::Invalid(format!("cannot read frame file: {e}")))?;
        if !actual_sha.eq_ignore_ascii_case(&frame.sha256) {
            return Err(FrameSkip::ShaMismatch);
        }

        Ok(self.buffers.lock().unwrap().join(
            &frame.room_id,
            ts_ms,
            self.settings.transcript_join_window_ms,
        ))
    }

    /// Issue the LLM request and cross-check its output.
    async fn perceive(
        &self,
        frame: &StreamFrame,
        transcripts: &[StreamTranscriptSegment],
    ) -> Option<StreamObservation> {
        let provider_name = self.provider.name().to_string();
        let trace_template = json!({
            "provider": provider_name,
            "model": self.provider_model,
            "latency_ms": if self.provider_kind == ProviderKind::Stub { 1 } else { 0 },
            "prompt_id": self.settings.observation_prompt_id,
            "prompt_sha256": self.prompt_sha256,
        });
        let payload = json!({
            "prompt_id": self.settings.observation_prompt_id,
            "prompt_sha256": self.prompt_sha256,
            "trace_template": trace_template,
            "frame": frame,
            "transcripts": transcripts,
        });

        let combined_text: String = transcripts
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut req = LlmRequest {
            persona_id: "stream_perceiver".to_string(),
            persona_display_name: "stream_perceiver".to_string(),
            room_id: frame.room_id.clone(),
            content: combined_text.trim().to_string(),
            ..Default::default()
        };
        let (system, user) = match self.renderer.render_stream_observation(&payload) {
            Ok(rendered) => rendered,
            Err(e) => {
                self.stats.schema_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "failed to render observation prompt");
                return None;
            }
        };
        req.system_prompt = system;
        req.user_prompt = user;

        self.stats.llm_calls.fetch_add(1, Ordering::Relaxed);
        let started = std::time::Instant::now();
        let response = match self.provider.generate(&req).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.llm_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "LLM call failed");
                return None;
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match parse_observation_response(&response.text, frame, transcripts) {
            Ok(mut observation) => {
                // live providers get the measured trace; the stub echoes the
                // template verbatim
                if self.provider_kind != ProviderKind::Stub {
                    observation.trace = crowdcast_protocol::ObservationTrace {
                        provider: response.provider,
                        model: response.model.unwrap_or_else(|| self.provider_model.clone()),
                        latency_ms: elapsed_ms,
                        prompt_id: self.settings.observation_prompt_id.clone(),
                        prompt_sha256: self.prompt_sha256.clone(),
                    };
                }
                Some(observation)
            }
            Err(reason) => {
                self.stats.schema_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%reason, "invalid observation output");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdcast_llm::stub::StubProvider;

    fn settings(repo_root: &Path) -> PerceiverSettings {
        PerceiverSettings {
            repo_root: repo_root.display().to_string(),
            ..Default::default()
        }
    }

    fn frame(room: &str, path: &str, sha: &str, ts: &str) -> StreamFrame {
        StreamFrame {
            schema_name: None,
            schema_version: None,
            id: "frame-1".into(),
            ts: ts.into(),
            room_id: room.into(),
            frame_path: path.into(),
            sha256: sha.into(),
            width: 1280,
            height: 720,
            format: "jpeg".into(),
            seq: 1,
            capture_ms: 33,
        }
    }

    fn segment(id: &str, room: &str, ts: &str, text: &str) -> StreamTranscriptSegment {
        StreamTranscriptSegment {
            schema_name: None,
            schema_version: None,
            id: id.into(),
            ts: ts.into(),
            room_id: room.into(),
            start_ms: 0,
            end_ms: 1000,
            text: text.into(),
            confidence: Some(0.9),
        }
    }

    /// Perceiver wired to the stub provider and a temp repo root.
    fn perceiver(dir: &Path) -> StreamPerceiver {
        let settings = settings(dir);
        StreamPerceiver {
            settings,
            stats: PerceiverStats::default(),
            provider: Arc::new(StubProvider::with_default("ok".into(), 200)),
            provider_kind: ProviderKind::Stub,
            provider_model: "stub".into(),
            renderer: test_renderer(dir),
            prompt_sha256: "prompt-digest".into(),
            repo_root: dir.to_path_buf(),
            buffers: Mutex::new(TranscriptBuffers::default()),
        }
    }

    fn test_renderer(dir: &Path) -> PromptRenderer {
        let prompt = "describe the stream moment";
        std::fs::write(dir.join("obs.txt"), prompt).unwrap();
        let manifest = json!({
            "prompts": [{
                "id": "stream_observation_v1",
                "purpose": "stream_observation",
                "path": "obs.txt",
                "sha256": crowdcast_llm::canonical_prompt_sha256(prompt),
            }]
        });
        let manifest_path = dir.join("manifest.json");
        std::fs::write(&manifest_path, manifest.to_string()).unwrap();
        PromptRenderer::load(&manifest_path, dir).unwrap()
    }

    #[test]
    fn app_alias_resolves_against_repo_root() {
        let root = Path::new("/srv/crowdcast");
        assert_eq!(
            resolve_frame_path("/app/data/frames/f.jpg", root),
            PathBuf::from("/srv/crowdcast/data/frames/f.jpg")
        );
        assert_eq!(
            resolve_frame_path("data/frames/f.jpg", root),
            PathBuf::from("/srv/crowdcast/data/frames/f.jpg")
        );
        assert_eq!(
            resolve_frame_path("/abs/f.jpg", root),
            PathBuf::from("/abs/f.jpg")
        );
    }

    #[test]
    fn hash_mismatch_blocks_the_frame() {
        // frame references a real file whose bytes do not match the claimed digest
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("frame.jpg");
        std::fs::write(&file, b"actual frame bytes").unwrap();

        let claimed = hex::encode(Sha256::digest(b"different frame bytes"));
        let p = perceiver(dir.path());
        let f = frame("room:demo", "frame.jpg", &claimed, "2024-05-01T12:00:00Z");

        assert_eq!(p.prepare_frame(&f), Err(FrameSkip::ShaMismatch));

        // and the matching digest passes
        let good = hex::encode(Sha256::digest(b"actual frame bytes"));
        let f = frame("room:demo", "frame.jpg", &good, "2024-05-01T12:00:00Z");
        assert!(p.prepare_frame(&f).is_ok());
    }

    #[test]
    fn missing_file_is_its_own_skip() {
        let dir = tempfile::tempdir().unwrap();
        let p = perceiver(dir.path());
        let sha = hex::encode(Sha256::digest(b"x"));
        let f = frame("room:demo", "nope.jpg", &sha, "2024-05-01T12:00:00Z");
        assert_eq!(p.prepare_frame(&f), Err(FrameSkip::FileMissing));
    }

    #[test]
    fn join_selects_window_and_orders_by_ts_then_id() {
        let mut buffers = TranscriptBuffers::default();
        let retention = 120_000;
        buffers.record(
            segment("t-b", "room:demo", "2024-05-01T12:00:10Z", "b"),
            retention,
        );
        buffers.record(
            segment("t-a", "room:demo", "2024-05-01T12:00:10Z", "a"),
            retention,
        );
        buffers.record(
            segment("t-far", "room:demo", "2024-05-01T12:02:00Z", "far"),
            retention,
        );

        let frame_ts = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:12Z")
            .unwrap()
            .timestamp_millis();
        let joined = buffers.join("room:demo", frame_ts, 30_000);
        let ids: Vec<&str> = joined.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["t-a", "t-b"], "window excludes t-far, ties by id");
    }

    #[test]
    fn watermark_prunes_old_segments() {
        let mut buffers = TranscriptBuffers::default();
        let retention = 60_000;
        buffers.record(
            segment("t-old", "room:demo", "2024-05-01T12:00:00Z", "old"),
            retention,
        );
        buffers.record(
            segment("t-new", "room:demo", "2024-05-01T12:05:00Z", "new"),
            retention,
        );
        let frame_ts = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:05:00Z")
            .unwrap()
            .timestamp_millis();
        let joined = buffers.join("room:demo", frame_ts, 600_000);
        let ids: Vec<&str> = joined.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["t-new"], "segment behind the watermark pruned");
    }

    #[test]
    fn cross_check_rejects_tampered_observations() {
        let sha = "a".repeat(64);
        let f = frame("room:demo", "frame.jpg", &sha, "2024-05-01T12:00:00Z");
        let segs = vec![segment("t-1", "room:demo", "2024-05-01T12:00:00Z", "hi")];

        let good = json!({
            "id": "obs-1",
            "ts": "2024-05-01T12:00:00Z",
            "room_id": "room:demo",
            "frame_id": "frame-1",
            "frame_sha256": sha,
            "transcript_ids": ["t-1"],
            "summary": "hi",
            "tags": [],
            "entities": [],
            "hype_level": 0.1,
            "safety": {"sexual": false, "violence": false, "self_harm": false,
                        "hate": false, "harassment": false},
            "trace": {"provider": "stub", "model": "stub", "latency_ms": 1,
                       "prompt_id": "p", "prompt_sha256": "d"}
        });
        assert!(parse_observation_response(&good.to_string(), &f, &segs).is_ok());

        let mut wrong_room = good.clone();
        wrong_room["room_id"] = json!("room:other");
        assert!(parse_observation_response(&wrong_room.to_string(), &f, &segs).is_err());

        let mut wrong_ids = good.clone();
        wrong_ids["transcript_ids"] = json!(["t-2"]);
        assert!(parse_observation_response(&wrong_ids.to_string(), &f, &segs).is_err());

        let mut wrong_sha = good.clone();
        wrong_sha["frame_sha256"] = json!("b".repeat(64));
        assert!(parse_observation_response(&wrong_sha.to_string(), &f, &segs).is_err());
    }

    #[tokio::test]
    async fn stub_round_trip_produces_a_valid_observation() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("frame.jpg");
        std::fs::write(&file, b"frame bytes").unwrap();
        let sha = hex::encode(Sha256::digest(b"frame bytes"));

        let p = perceiver(dir.path());
        let f = frame("room:demo", "frame.jpg", &sha, "2024-05-01T12:00:00Z");
        p.buffers.lock().unwrap().record(
            segment("t-1", "room:demo", "2024-05-01T12:00:05Z", "what a play"),
            p.settings.transcript_buffer_retention_ms,
        );

        let transcripts = p.prepare_frame(&f).unwrap();
        assert_eq!(transcripts.len(), 1);
        let observation = p.perceive(&f, &transcripts).await.expect("observation");
        assert_eq!(observation.frame_id, "frame-1");
        assert_eq!(observation.frame_sha256, sha);
        assert_eq!(observation.transcript_ids, vec!["t-1"]);
        assert_eq!(observation.summary, "what a play");
    }
}
