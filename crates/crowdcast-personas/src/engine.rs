//! Chat-reactive decision engine.
//!
//! Hard gates short-circuit in a fixed order; survivors face a deterministic
//! probabilistic gate: the Blake2b hash of `"<message_id>:<persona_id>"`
//! against a threshold shaped by mentions, hype, and room activity. Forced
//! E2E markers bypass the probability entirely but never the hard gates.

use serde::Serialize;

use crowdcast_core::hash;
use crowdcast_protocol::ChatMessage;

use crate::configs::PersonaConfig;
use crate::state::WorkerState;
use crate::text::{detect_hype, detect_mention};

pub const E2E_FORCE_TOKENS: [&str; 3] = ["E2E_TEST_BOTLOOP_", "E2E_TEST_", "E2E_MARKER_"];

/// Floor for the probabilistic threshold once rate penalties apply.
const P_FLOOR: f64 = 0.02;

#[derive(Debug, Clone, Copy)]
pub struct GateParams {
    pub max_react_age_s: f64,
    pub soft_cooldown_ms: i64,
    pub hard_cooldown_ms: Option<i64>,
    pub p_base: f64,
    pub p_mention_bonus: f64,
    pub p_hype_bonus: f64,
    pub p_rate_penalty_per_msg: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionTags {
    pub p_used: f64,
    pub h_value: f64,
    pub mention_detected: bool,
    pub hype_detected: bool,
    pub rate_10s: usize,
    pub ts_ms: i64,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub emit: bool,
    pub reason: &'static str,
    pub tags: DecisionTags,
}

impl Decision {
    fn suppress(reason: &'static str, now_ms: i64) -> Self {
        Self {
            emit: false,
            reason,
            tags: DecisionTags {
                ts_ms: now_ms,
                ..Default::default()
            },
        }
    }
}

pub fn contains_force_token(content: &str) -> bool {
    E2E_FORCE_TOKENS.iter().any(|t| content.contains(t))
}

/// Evaluate one persona against one firehose message. First matching gate
/// wins the reason.
pub fn evaluate(
    msg: &ChatMessage,
    persona: &PersonaConfig,
    config_room_id: Option<&str>,
    state: &mut WorkerState,
    params: &GateParams,
    now_ms: i64,
) -> Decision {
    if msg.is_bot() {
        return Decision::suppress("bot_origin", now_ms);
    }

    let age_s = match msg.ts_ms() {
        Some(ts_ms) => (now_ms - ts_ms) as f64 / 1000.0,
        None => 0.0,
    };
    if age_s > params.max_react_age_s {
        return Decision::suppress("too_old", now_ms);
    }

    if let Some(expected) = config_room_id {
        if !expected.is_empty() && expected != msg.room_id {
            return Decision::suppress("wrong_room", now_ms);
        }
    }

    let cooldown_ms = params
        .soft_cooldown_ms
        .max(params.hard_cooldown_ms.unwrap_or(0));
    if let Some(last) = state.persona(&persona.persona_id).last_spoke_at_ms {
        if now_ms - last < cooldown_ms {
            return Decision::suppress("cooldown", now_ms);
        }
    }

    if !state.room(&msg.room_id).within_budget(now_ms) {
        return Decision::suppress("budget", now_ms);
    }

    let mention_detected = detect_mention(&msg.content, &persona.display_name);
    if mention_detected {
        state.persona(&persona.persona_id).record_mention(now_ms);
    }
    let hype_detected = detect_hype(&msg.content);
    let rate_10s = state.room(&msg.room_id).rate_10s(now_ms);

    if contains_force_token(&msg.content) {
        return Decision {
            emit: true,
            reason: "e2e_forced",
            tags: DecisionTags {
                p_used: 1.0,
                h_value: 0.0,
                mention_detected,
                hype_detected,
                rate_10s,
                ts_ms: now_ms,
            },
        };
    }

    let mut p = params.p_base;
    if mention_detected {
        p = (p + params.p_mention_bonus).min(1.0);
    }
    if hype_detected {
        p = (p + params.p_hype_bonus).min(1.0);
    }
    if rate_10s > 0 {
        p = (p - params.p_rate_penalty_per_msg * rate_10s as f64).max(P_FLOOR);
    }

    let h = hash::unit_interval(&format!("{}:{}", msg.id, persona.persona_id));
    let emit = h < p;
    Decision {
        emit,
        reason: if emit { "p_gate_pass" } else { "p_gate" },
        tags: DecisionTags {
            p_used: p,
            h_value: h,
            mention_detected,
            hype_detected,
            rate_10s,
            ts_ms: now_ms,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::{PersonaAnchor, PersonaPresentation, PersonaSafety};
    use chrono::{TimeZone, Utc};
    use crowdcast_core::config::BOT_BUDGET_WINDOW_MS;
    use crowdcast_protocol::{Origin, Trace};

    fn persona(id: &str, name: &str) -> PersonaConfig {
        PersonaConfig {
            persona_id: id.into(),
            display_name: name.into(),
            safety: PersonaSafety::default(),
            anchor: PersonaAnchor::default(),
            presentation: PersonaPresentation::default(),
        }
    }

    fn params() -> GateParams {
        GateParams {
            max_react_age_s: 20.0,
            soft_cooldown_ms: 1500,
            hard_cooldown_ms: None,
            p_base: 0.15,
            p_mention_bonus: 0.35,
            p_hype_bonus: 0.20,
            p_rate_penalty_per_msg: 0.02,
        }
    }

    fn state() -> WorkerState {
        WorkerState::new(50, 1000, 5, BOT_BUDGET_WINDOW_MS, 60_000)
    }

    fn message(id: &str, content: &str, ts_ms: i64) -> ChatMessage {
        ChatMessage {
            schema_name: None,
            schema_version: None,
            id: id.into(),
            ts: Utc.timestamp_millis_opt(ts_ms)
                .unwrap()
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            room_id: "room:demo".into(),
            origin: Origin::Human,
            content: content.into(),
            user_id: Some("u1".into()),
            display_name: Some("viewer".into()),
            reply_to: None,
            mentions: None,
            emotes: None,
            badges: None,
            style: None,
            client_meta: None,
            moderation: None,
            trace: None,
        }
    }

    const NOW_MS: i64 = 1_714_564_800_000;

    #[test]
    fn bot_origin_wins_over_everything() {
        let mut st = state();
        let mut msg = message("m1", "E2E_TEST_FORCED", NOW_MS);
        msg.origin = Origin::Bot;
        msg.trace = Some(Trace {
            persona_id: Some("other".into()),
            ..Default::default()
        });
        let d = evaluate(&msg, &persona("p", "P"), None, &mut st, &params(), NOW_MS);
        assert!(!d.emit);
        assert_eq!(d.reason, "bot_origin");
    }

    #[test]
    fn stale_messages_are_too_old() {
        let mut st = state();
        let msg = message("m1", "hello", NOW_MS - 25_000);
        let d = evaluate(&msg, &persona("p", "P"), None, &mut st, &params(), NOW_MS);
        assert_eq!(d.reason, "too_old");
    }

    #[test]
    fn wrong_room_is_suppressed() {
        let mut st = state();
        let msg = message("m1", "hello", NOW_MS);
        let d = evaluate(
            &msg,
            &persona("p", "P"),
            Some("room:other"),
            &mut st,
            &params(),
            NOW_MS,
        );
        assert_eq!(d.reason, "wrong_room");
    }

    #[test]
    fn cooldown_uses_max_of_soft_and_hard() {
        let mut st = state();
        st.persona("p").last_spoke_at_ms = Some(NOW_MS - 2_000);

        // soft 1500 already elapsed, but hard 5000 has not
        let mut p = params();
        p.hard_cooldown_ms = Some(5_000);
        let msg = message("m1", "E2E_TEST_X", NOW_MS);
        let d = evaluate(&msg, &persona("p", "P"), None, &mut st, &p, NOW_MS);
        assert_eq!(d.reason, "cooldown");

        p.hard_cooldown_ms = None;
        let d = evaluate(&msg, &persona("p", "P"), None, &mut st, &p, NOW_MS);
        assert!(d.emit, "soft cooldown alone has elapsed");
    }

    #[test]
    fn budget_suppresses_forced_bursts() {
        // ten forced messages, budget of five: messages 6..10 suppressed
        let mut st = state();
        let p = params();
        let persona = persona("p", "P");
        let mut emitted = 0;
        let mut suppressed = 0;
        for i in 0..10 {
            let now = NOW_MS + i * 100;
            let msg = message(&format!("m{i}"), "go E2E_TEST_BOTLOOP_x", now);
            let d = evaluate(&msg, &persona, None, &mut st, &p, now);
            if d.emit {
                emitted += 1;
                // mirror the worker: budget reflects successful publishes
                st.persona("p").last_spoke_at_ms = None;
                st.room("room:demo").record_bot_publish(now);
            } else {
                assert_eq!(d.reason, "budget");
                suppressed += 1;
            }
        }
        assert_eq!(emitted, 5);
        assert_eq!(suppressed, 5);
    }

    #[test]
    fn forced_marker_bypasses_probability() {
        let mut st = state();
        let msg = message("m1", "please E2E_MARKER_abc", NOW_MS);
        let d = evaluate(&msg, &persona("p", "P"), None, &mut st, &params(), NOW_MS);
        assert!(d.emit);
        assert_eq!(d.reason, "e2e_forced");
    }

    #[test]
    fn mention_bonus_shapes_the_threshold() {
        // p = 0.15 + 0.35 = 0.50 on mention; emit iff h < 0.5 for the
        // fixed (message_id, persona_id) pair
        let mut st = state();
        let persona = persona("clipgoblin", "ClipGoblin");
        let msg = message("m-mention-1", "@clipgoblin lfg", NOW_MS);
        let d = evaluate(&msg, &persona, None, &mut st, &params(), NOW_MS);

        assert!(d.tags.mention_detected);
        assert_eq!(d.tags.p_used, 0.50);
        let h = crowdcast_core::hash::unit_interval("m-mention-1:clipgoblin");
        assert_eq!(d.tags.h_value, h);
        assert_eq!(d.emit, h < 0.50);
    }

    #[test]
    fn rate_penalty_lowers_but_never_below_floor() {
        let mut st = state();
        let persona = persona("p", "P");
        // flood the room event window
        for i in 0..60 {
            st.room("room:demo").record_event(NOW_MS - 100 + i);
        }
        let msg = message("m1", "quiet message", NOW_MS);
        let d = evaluate(&msg, &persona, None, &mut st, &params(), NOW_MS);
        assert_eq!(d.tags.rate_10s, 60);
        assert_eq!(d.tags.p_used, 0.02, "clamped at the floor");
    }

    #[test]
    fn decision_is_deterministic() {
        let p = params();
        let persona = persona("p", "P");
        let run = || {
            let mut st = state();
            let msg = message("m-det", "some normal chat line", NOW_MS);
            evaluate(&msg, &persona, None, &mut st, &p, NOW_MS)
        };
        let (a, b) = (run(), run());
        assert_eq!(a.emit, b.emit);
        assert_eq!(a.tags.h_value, b.tags.h_value);
        assert_eq!(a.tags.p_used, b.tags.p_used);
    }
}
