//! Auto-commentary decision engine.
//!
//! Driven by stream observations rather than chat. Gate order: interesting
//! filter, momentum, room rate limit, per-observation cap, summary dedupe.
//! Persona selection is fully deterministic: Blake2b over
//! `"<obs_seed>:<room_id>:<persona_id>"` plus a mention boost, ties broken
//! by lexicographic persona id.

use std::collections::HashSet;

use regex::Regex;
use sha2::{Digest, Sha256};

use crowdcast_core::hash;
use crowdcast_protocol::StreamObservation;

use crate::auto_config::{normalize_tokens, AutoCommentaryConfig};
use crate::state::AutoCommentaryState;

#[derive(Debug, Clone)]
pub struct EmitCheck {
    pub emit: bool,
    pub reason: &'static str,
    pub score: f64,
}

/// Normalized summary used for dedupe hashing: lowercase, punctuation to
/// spaces, collapsed whitespace.
fn normalize_summary(text: &str, normalize: bool) -> String {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return String::new();
    }
    if !normalize {
        return cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    let lowered = cleaned.to_lowercase();
    let scrubbed: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();
    scrubbed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 of the normalized summary; empty string when nothing remains.
pub fn summary_hash(obs: &StreamObservation, cfg: &AutoCommentaryConfig) -> String {
    let normalized = normalize_summary(&obs.summary, cfg.summary_dedupe.normalize);
    if normalized.is_empty() {
        return String::new();
    }
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Monotone non-negative interest score.
pub fn interest_score(obs: &StreamObservation, cfg: &AutoCommentaryConfig) -> f64 {
    let hype = obs.hype_level.clamp(0.0, 1.0);
    let tags: HashSet<String> = normalize_tokens(&obs.tags).into_iter().collect();
    let entities = normalize_tokens(&obs.entities);

    let mut score = hype * cfg.interest_weights.hype;
    if !entities.is_empty() {
        score += cfg.interest_weights.mentions;
        score += (entities.len().min(3) as f64 / 3.0) * cfg.interest_weights.entities;
    }
    if tags.contains("hype") {
        score += cfg.interest_weights.tag_hype;
    }
    score
}

fn is_interesting(obs: &StreamObservation, cfg: &AutoCommentaryConfig, score: f64) -> bool {
    if obs.hype_level >= cfg.hype_threshold {
        return true;
    }
    if !cfg.trigger_tags.is_empty() {
        let tags: HashSet<String> = normalize_tokens(&obs.tags).into_iter().collect();
        if cfg.trigger_tags.iter().any(|t| tags.contains(t)) {
            return true;
        }
    }
    if cfg.trigger_on_entities && obs.entities.iter().any(|e| !e.trim().is_empty()) {
        return true;
    }
    score >= cfg.hype_threshold
}

/// Run the gate chain for one observation. First failing gate names the
/// reason.
pub fn should_emit(
    obs: &StreamObservation,
    auto: &mut AutoCommentaryState,
    cfg: &AutoCommentaryConfig,
    now_ms: i64,
) -> EmitCheck {
    let score = interest_score(obs, cfg);
    if !is_interesting(obs, cfg, score) {
        return EmitCheck {
            emit: false,
            reason: "not_interesting",
            score,
        };
    }

    if let Err(reason) = auto.momentum_ready(
        &obs.room_id,
        now_ms,
        cfg.momentum.window_ms,
        cfg.momentum.max_msgs,
        cfg.momentum.min_interval_ms,
    ) {
        return EmitCheck {
            emit: false,
            reason,
            score,
        };
    }

    if !auto.room_ready(&obs.room_id, now_ms, cfg.room_rate_limit_ms) {
        return EmitCheck {
            emit: false,
            reason: "room_rate",
            score,
        };
    }

    if cfg.max_messages_per_observation > 0 && !obs.id.is_empty() {
        let count = auto.observation_count(&obs.id, now_ms, cfg.dedupe_window_ms);
        if count >= cfg.max_messages_per_observation {
            return EmitCheck {
                emit: false,
                reason: "max_per_observation",
                score,
            };
        }
    }

    if cfg.summary_dedupe.enabled {
        let hash = summary_hash(obs, cfg);
        if !hash.is_empty() && auto.summary_seen_before(&hash, now_ms, cfg.summary_dedupe.ttl_ms) {
            return EmitCheck {
                emit: false,
                reason: "summary_dedupe",
                score,
            };
        }
    }

    EmitCheck {
        emit: true,
        reason: "ok",
        score,
    }
}

/// Personas the observation names: lowercase id as a whole word or `@id` in
/// the summary, or present among lowercased entities.
fn extract_mentions(obs: &StreamObservation, persona_ids: &[String]) -> HashSet<String> {
    let entity_set: HashSet<String> = normalize_tokens(&obs.entities).into_iter().collect();
    let summary = obs.summary.to_lowercase();

    let mut mentioned = HashSet::new();
    for persona_id in persona_ids {
        let pid = persona_id.to_lowercase();
        if entity_set.contains(&pid) || summary.contains(&format!("@{pid}")) {
            mentioned.insert(persona_id.clone());
            continue;
        }
        if let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(&pid))) {
            if re.is_match(&summary) {
                mentioned.insert(persona_id.clone());
            }
        }
    }
    mentioned
}

/// Deterministic persona selection. Returns the winner and the selection
/// reason (`mention_targeted`, `diversity_filtered`, `diversity_fallback`,
/// `deterministic`, or `no_persona`).
pub fn pick_persona(
    obs: &StreamObservation,
    auto: &AutoCommentaryState,
    cfg: &AutoCommentaryConfig,
    enabled_personas: &[String],
) -> (Option<String>, &'static str) {
    let mut persona_ids: Vec<String> = enabled_personas
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    persona_ids.sort();
    persona_ids.dedup();
    if persona_ids.is_empty() {
        return (None, "no_persona");
    }

    let obs_seed = if !obs.id.is_empty() {
        obs.id.clone()
    } else if !obs.summary.is_empty() {
        obs.summary.clone()
    } else {
        "obs".to_string()
    };

    let avoid_last_n = cfg.persona_diversity.avoid_repeat_last_n;
    let recent = auto.recent_personas(&obs.room_id, avoid_last_n);
    let mut candidates: Vec<&String> = persona_ids.iter().collect();
    let mut diversity_reason = "deterministic";
    if avoid_last_n > 0 {
        let filtered: Vec<&String> = persona_ids
            .iter()
            .filter(|p| !recent.contains(p))
            .collect();
        if filtered.is_empty() {
            diversity_reason = "diversity_fallback";
        } else {
            candidates = filtered;
            diversity_reason = "diversity_filtered";
        }
    }

    let mentioned = if cfg.mention_targeting.enabled {
        extract_mentions(obs, &persona_ids)
    } else {
        HashSet::new()
    };

    let mut best: Option<(&String, f64)> = None;
    for persona_id in candidates {
        let seed = format!("{obs_seed}:{}:{persona_id}", obs.room_id);
        let mut score = hash::unit_interval(&seed);
        if mentioned.contains(persona_id) {
            score += cfg.mention_targeting.boost;
        }
        let better = match &best {
            None => true,
            Some((best_id, best_score)) => {
                score > *best_score || (score == *best_score && persona_id < *best_id)
            }
        };
        if better {
            best = Some((persona_id, score));
        }
    }

    match best {
        Some((winner, _)) if mentioned.contains(winner) => {
            (Some(winner.clone()), "mention_targeted")
        }
        Some((winner, _)) => (Some(winner.clone()), diversity_reason),
        None => (None, "no_persona"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdcast_protocol::ObservationTrace;

    fn config() -> AutoCommentaryConfig {
        serde_json::from_str(r#"{"enabled": true, "trigger_tags": ["clutch"]}"#).unwrap()
    }

    fn observation(id: &str, summary: &str, hype: f64) -> StreamObservation {
        StreamObservation {
            schema_name: None,
            schema_version: None,
            id: id.into(),
            ts: "2024-05-01T12:00:00Z".into(),
            room_id: "room:demo".into(),
            frame_id: "f-1".into(),
            frame_sha256: "a".repeat(64),
            transcript_ids: vec![],
            summary: summary.into(),
            tags: vec![],
            entities: vec![],
            hype_level: hype,
            safety: Default::default(),
            trace: ObservationTrace {
                provider: "stub".into(),
                model: "stub".into(),
                latency_ms: 1,
                prompt_id: "p".into(),
                prompt_sha256: "s".into(),
            },
        }
    }

    const NOW_MS: i64 = 1_000_000;

    #[test]
    fn dull_observation_is_not_interesting() {
        let mut auto = AutoCommentaryState::default();
        let obs = observation("o1", "nothing much", 0.1);
        let check = should_emit(&obs, &mut auto, &config(), NOW_MS);
        assert!(!check.emit);
        assert_eq!(check.reason, "not_interesting");
    }

    #[test]
    fn hype_tags_and_entities_all_trigger() {
        let mut auto = AutoCommentaryState::default();
        let cfg = config();

        let hyped = observation("o1", "big moment", 0.9);
        assert!(should_emit(&hyped, &mut auto, &cfg, NOW_MS).emit);

        let mut tagged = observation("o2", "tag moment two", 0.1);
        tagged.tags = vec!["CLUTCH".into()];
        assert!(should_emit(&tagged, &mut auto, &cfg, NOW_MS + 10_000).emit);

        let mut with_entities = observation("o3", "entity moment three", 0.1);
        with_entities.entities = vec!["streamer".into()];
        assert!(should_emit(&with_entities, &mut auto, &cfg, NOW_MS + 20_000).emit);
    }

    #[test]
    fn identical_summaries_dedupe_within_ttl() {
        // two observations, same normalized summary, inside the ttl
        let mut auto = AutoCommentaryState::default();
        let cfg = config();

        let first = observation("o1", "HUGE play by the streamer!", 0.9);
        let check = should_emit(&first, &mut auto, &cfg, NOW_MS);
        assert!(check.emit);
        auto.record_publish("room:demo", "persona-a", "o1", NOW_MS);

        let second = observation("o2", "huge play, by the streamer", 0.9);
        let check = should_emit(&second, &mut auto, &cfg, NOW_MS + 30_000);
        assert!(!check.emit);
        assert_eq!(check.reason, "summary_dedupe");
    }

    #[test]
    fn per_observation_cap_applies() {
        let mut auto = AutoCommentaryState::default();
        let cfg = config();
        let obs = observation("o1", "first summary here", 0.9);
        assert!(should_emit(&obs, &mut auto, &cfg, NOW_MS).emit);
        auto.record_publish("room:demo", "a", "o1", NOW_MS);

        // different summary so dedupe passes; same observation id
        let again = observation("o1", "a different angle entirely", 0.9);
        let check = should_emit(&again, &mut auto, &cfg, NOW_MS + 30_000);
        assert!(!check.emit);
        assert_eq!(check.reason, "max_per_observation");
    }

    #[test]
    fn room_rate_limits_follow_ups() {
        let mut auto = AutoCommentaryState::default();
        let cfg = config();
        let first = observation("o1", "first summary", 0.9);
        assert!(should_emit(&first, &mut auto, &cfg, NOW_MS).emit);
        auto.record_publish("room:demo", "a", "o1", NOW_MS);

        let second = observation("o2", "second summary", 0.9);
        let check = should_emit(&second, &mut auto, &cfg, NOW_MS + 3_000);
        assert!(!check.emit);
        // momentum min-interval fires before the room rate gate
        assert_eq!(check.reason, "momentum_interval");

        let third = observation("o3", "third summary", 0.9);
        let check = should_emit(&third, &mut auto, &cfg, NOW_MS + 5_000);
        assert!(!check.emit);
        assert_eq!(check.reason, "room_rate");
    }

    #[test]
    fn interest_score_is_monotone_in_inputs() {
        let cfg = config();
        let base = observation("o", "s", 0.2);
        let mut rich = observation("o", "s", 0.2);
        rich.entities = vec!["a".into(), "b".into()];
        rich.tags = vec!["hype".into()];
        assert!(interest_score(&rich, &cfg) > interest_score(&base, &cfg));
    }

    #[test]
    fn selection_is_deterministic_with_stable_tie_break() {
        let auto = AutoCommentaryState::default();
        let mut cfg = config();
        cfg.persona_diversity.avoid_repeat_last_n = 0;
        let obs = observation("obs-42", "idle chatter", 0.9);
        let personas = vec!["beta".to_string(), "alpha".to_string(), "gamma".to_string()];

        let (first, reason) = pick_persona(&obs, &auto, &cfg, &personas);
        let (second, _) = pick_persona(&obs, &auto, &cfg, &personas);
        assert_eq!(first, second);
        assert_eq!(reason, "deterministic");

        // winner matches a hand-rolled argmax with lexicographic ties
        let expected = ["alpha", "beta", "gamma"]
            .iter()
            .map(|p| {
                (
                    *p,
                    crowdcast_core::hash::unit_interval(&format!("obs-42:room:demo:{p}")),
                )
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(b.0.cmp(a.0)))
            .map(|(p, _)| p.to_string());
        assert_eq!(first, expected);
    }

    #[test]
    fn mentioned_persona_is_targeted() {
        let auto = AutoCommentaryState::default();
        let mut cfg = config();
        // boost above 1.0 so the mentioned persona always outranks base scores
        cfg.mention_targeting.boost = 1.5;
        let mut obs = observation("obs-1", "what does @zed think about this", 0.9);
        obs.entities = vec![];
        let personas = vec!["alpha".to_string(), "zed".to_string()];
        let (winner, reason) = pick_persona(&obs, &auto, &cfg, &personas);
        assert_eq!(winner.as_deref(), Some("zed"));
        assert_eq!(reason, "mention_targeted");
    }

    #[test]
    fn diversity_filters_recent_speakers_and_falls_back() {
        let mut auto = AutoCommentaryState::default();
        let cfg = config();
        let obs = observation("obs-7", "plain event", 0.9);
        let personas = vec!["alpha".to_string(), "beta".to_string()];

        auto.record_publish("room:demo", "alpha", "x", NOW_MS);
        let (winner, reason) = pick_persona(&obs, &auto, &cfg, &personas);
        assert_eq!(winner.as_deref(), Some("beta"), "alpha filtered as recent");
        assert_eq!(reason, "diversity_filtered");

        auto.record_publish("room:demo", "beta", "y", NOW_MS + 1);
        let (winner, reason) = pick_persona(&obs, &auto, &cfg, &personas);
        assert!(winner.is_some(), "fallback to the unfiltered list");
        assert_eq!(reason, "diversity_fallback");
    }
}
