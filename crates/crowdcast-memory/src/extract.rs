//! Memory extraction from human chat.
//!
//! Two strategies behind one entry point: a cheap heuristic that recognises
//! explicit self-disclosures, and an LLM pass that asks the provider for
//! candidate items as JSON. Either way every candidate is normalized,
//! redacted, validated, and policy-gated before it becomes a store write.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crowdcast_llm::{LlmProvider, LlmRequest, PromptRenderer};

use crate::policy::{should_store_item, MemoryPolicy};
use crate::redaction::{is_effectively_empty, Redactor};
use crate::types::{MemoryItem, MemoryScope, MemorySource, MAX_VALUE_CHARS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStrategy {
    Heuristic,
    Llm,
}

impl ExtractStrategy {
    pub fn parse(s: &str) -> Self {
        match s {
            "llm" => ExtractStrategy::Llm,
            _ => ExtractStrategy::Heuristic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractStrategy::Heuristic => "heuristic",
            ExtractStrategy::Llm => "llm",
        }
    }
}

/// One extraction request, lifted from the triggering chat message.
#[derive(Debug, Clone, Default)]
pub struct ExtractContext {
    pub content: String,
    pub room_id: String,
    pub persona_id: Option<String>,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub message_id: Option<String>,
    pub origin: Option<String>,
    pub recent_messages: Vec<String>,
    pub marker: Option<String>,
}

#[derive(Debug, Default)]
pub struct ExtractOutcome {
    pub accepted: Vec<MemoryItem>,
    pub rejected: usize,
    pub redacted: usize,
    pub error: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

pub struct MemoryExtractor {
    policy: MemoryPolicy,
    redactor: Redactor,
    strategy: ExtractStrategy,
    provider: Option<Arc<dyn LlmProvider>>,
    renderer: Option<Arc<PromptRenderer>>,
    max_items: usize,
    scope_user_enabled: bool,
}

impl MemoryExtractor {
    pub fn new(
        policy: MemoryPolicy,
        strategy: ExtractStrategy,
        provider: Option<Arc<dyn LlmProvider>>,
        renderer: Option<Arc<PromptRenderer>>,
        max_items: usize,
        scope_user_enabled: bool,
    ) -> Self {
        let redactor = Redactor::new(&policy);
        Self {
            policy,
            redactor,
            strategy,
            provider,
            renderer,
            max_items,
            scope_user_enabled,
        }
    }

    pub fn strategy(&self) -> ExtractStrategy {
        self.strategy
    }

    pub async fn extract(&self, ctx: &ExtractContext) -> ExtractOutcome {
        match self.strategy {
            ExtractStrategy::Heuristic => self.extract_heuristic(ctx),
            ExtractStrategy::Llm => self.extract_llm(ctx).await,
        }
    }

    /// Recognise explicit self-disclosures without burning an LLM call.
    fn extract_heuristic(&self, ctx: &ExtractContext) -> ExtractOutcome {
        let mut outcome = ExtractOutcome::default();

        let rules: [(&str, &str, &str, f64); 2] = [
            (
                r"(?i)\bstreamer is called\s+([A-Za-z0-9_()\-]+)",
                "room_lore",
                "streamer_name",
                0.9,
            ),
            (
                r"(?i)\bmy name is\s+([A-Za-z0-9_()\-]+)",
                "user_profile",
                "display_name",
                0.8,
            ),
        ];

        let mut candidates = Vec::new();
        for (pattern, category, subject, confidence) in rules {
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(_) => continue,
            };
            if let Some(caps) = re.captures(&ctx.content) {
                candidates.push(serde_json::json!({
                    "category": category,
                    "subject": subject,
                    "value": caps[1].to_string(),
                    "confidence": confidence,
                }));
            }
        }

        for candidate in candidates.into_iter().take(self.max_items) {
            self.admit_candidate(candidate, ctx, &mut outcome);
        }
        if outcome.accepted.is_empty() && outcome.error.is_none() {
            outcome.error = Some("no_items_accepted".to_string());
        }
        outcome
    }

    async fn extract_llm(&self, ctx: &ExtractContext) -> ExtractOutcome {
        let mut outcome = ExtractOutcome::default();
        let (Some(provider), Some(renderer)) = (&self.provider, &self.renderer) else {
            outcome.error = Some("llm_extract_unconfigured".to_string());
            return outcome;
        };

        let mut req = LlmRequest {
            persona_id: ctx.persona_id.clone().unwrap_or_else(|| "memory".into()),
            persona_display_name: ctx
                .display_name
                .clone()
                .or_else(|| ctx.persona_id.clone())
                .unwrap_or_else(|| "memory".into()),
            room_id: ctx.room_id.clone(),
            content: ctx.content.clone(),
            marker: Some(
                ctx.marker
                    .clone()
                    .unwrap_or_else(|| "E2E_TEST_MEMORY_LLM".into()),
            ),
            recent_messages: ctx.recent_messages.clone(),
            ..Default::default()
        };
        let (system, user) = match renderer.render_memory_extract(&req) {
            Ok(rendered) => rendered,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        req.system_prompt = system;
        req.user_prompt = user;

        let response = match provider.generate(&req).await {
            Ok(resp) => resp,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.provider = Some(response.provider.clone());
        outcome.model = response.model.clone();

        let (candidates, parse_err) = extract_json_candidates(&response.text);
        if let Some(err) = parse_err {
            outcome.error = Some(err.to_string());
            return outcome;
        }

        for candidate in candidates.into_iter().take(self.max_items) {
            self.admit_candidate(candidate, ctx, &mut outcome);
        }
        if outcome.accepted.is_empty() && outcome.error.is_none() {
            outcome.error = Some("no_items_accepted".to_string());
        }
        outcome
    }

    /// Normalize -> redact -> validate -> policy-gate one candidate.
    fn admit_candidate(&self, candidate: Value, ctx: &ExtractContext, outcome: &mut ExtractOutcome) {
        let mut item = match self.normalize_candidate(candidate, ctx) {
            Ok(item) => item,
            Err(reason) => {
                outcome.rejected += 1;
                outcome.error = Some(reason);
                return;
            }
        };

        let (redacted_value, notes) = self.redactor.apply(&item.value);
        item.value = redacted_value;
        if !notes.is_empty() {
            item.redactions = notes;
            outcome.redacted += 1;
        }
        if is_effectively_empty(&item.value) {
            outcome.rejected += 1;
            return;
        }

        if let Err(e) = item.validate() {
            outcome.rejected += 1;
            outcome.error = Some(e.to_string());
            return;
        }

        match should_store_item(&self.policy, &mut item) {
            Ok(()) => outcome.accepted.push(item),
            Err(reason) => {
                debug!(reason, subject = %item.subject, "memory candidate rejected by policy");
                outcome.rejected += 1;
                outcome.error = Some(reason.to_string());
            }
        }
    }

    fn derive_scope(&self, ctx: &ExtractContext) -> (MemoryScope, String) {
        let scopes = &self.policy.scopes;
        let has = |name: &str| scopes.iter().any(|s| s == name);

        let scope = if self.scope_user_enabled && ctx.user_id.is_some() && has("persona_user") {
            MemoryScope::PersonaUser
        } else if has("persona_room") {
            MemoryScope::PersonaRoom
        } else if has("persona") {
            MemoryScope::Persona
        } else if has("persona_user") && ctx.user_id.is_some() {
            MemoryScope::PersonaUser
        } else {
            MemoryScope::PersonaRoom
        };

        let persona = ctx.persona_id.as_deref().unwrap_or("persona");
        let room = if ctx.room_id.is_empty() {
            "room"
        } else {
            ctx.room_id.as_str()
        };
        let user = ctx.user_id.as_deref().unwrap_or("user");

        let scope_key = match scope {
            MemoryScope::Persona => persona.to_string(),
            MemoryScope::PersonaRoom => format!("{room}:{persona}"),
            MemoryScope::PersonaUser => format!("{room}:{persona}:{user}"),
        };
        let scope_key = scope_key.replace(['\n', '\r'], " ").trim().to_string();
        (scope, scope_key)
    }

    fn normalize_candidate(
        &self,
        candidate: Value,
        ctx: &ExtractContext,
    ) -> Result<MemoryItem, String> {
        let obj = candidate.as_object().ok_or("candidate_not_object")?;

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let ts = obj
            .get("ts")
            .and_then(Value::as_str)
            .filter(|t| chrono::DateTime::parse_from_rfc3339(t).is_ok())
            .map(str::to_string)
            .unwrap_or(now);

        let subject = obj
            .get("subject")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| ctx.persona_id.clone())
            .or_else(|| ctx.display_name.clone())
            .unwrap_or_else(|| "room".to_string());

        let category = obj
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or("room_lore")
            .to_string();

        let confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        let ttl_days = obj
            .get("ttl_days")
            .and_then(Value::as_i64)
            .or(self.policy.ttl_days_default)
            .unwrap_or(0);

        let value: String = match obj.get("value") {
            Some(Value::String(s)) => s.trim().chars().take(MAX_VALUE_CHARS).collect(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string().chars().take(MAX_VALUE_CHARS).collect(),
        };

        let (scope, scope_key) = match (
            obj.get("scope").and_then(Value::as_str),
            obj.get("scope_key").and_then(Value::as_str),
        ) {
            (Some(scope_str), Some(key)) => {
                let scope = match scope_str {
                    "persona" => MemoryScope::Persona,
                    "persona_user" => MemoryScope::PersonaUser,
                    _ => MemoryScope::PersonaRoom,
                };
                (scope, key.replace(['\n', '\r'], " ").trim().to_string())
            }
            _ => self.derive_scope(ctx),
        };

        let source = MemorySource {
            kind: "chat_message".to_string(),
            message_id: ctx.message_id.clone(),
            user_id: ctx.user_id.clone(),
            origin: Some(ctx.origin.clone().unwrap_or_else(|| "human".to_string())),
        };

        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let seed = format!(
                    "{}:{}:{}:{}",
                    ctx.room_id,
                    ctx.persona_id.as_deref().unwrap_or(""),
                    value,
                    ts
                );
                hex::encode(Sha256::digest(seed.as_bytes()))[..16].to_string()
            });

        Ok(MemoryItem {
            schema_name: Some("MemoryItem".to_string()),
            schema_version: Some("1.0.0".to_string()),
            id,
            ts,
            scope,
            scope_key,
            category,
            subject,
            value,
            confidence,
            ttl_days,
            source,
            redactions: vec![],
        })
    }
}

/// Pull JSON candidates out of model text: a bare array, an `{"items": []}`
/// wrapper, or a single object — with a bracket-slice fallback for replies
/// that wrap the JSON in prose.
fn extract_json_candidates(text: &str) -> (Vec<Value>, Option<&'static str>) {
    let stripped = text.trim();
    if stripped.is_empty() {
        return (Vec::new(), Some("empty_output"));
    }

    fn parse(candidate: &str) -> Vec<Value> {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Array(arr)) => arr.into_iter().filter(|v| v.is_object()).collect(),
            Ok(Value::Object(obj)) => {
                if let Some(Value::Array(items)) = obj.get("items") {
                    items.iter().filter(|v| v.is_object()).cloned().collect()
                } else {
                    vec![Value::Object(obj)]
                }
            }
            _ => Vec::new(),
        }
    }

    let direct = parse(stripped);
    if !direct.is_empty() {
        return (direct, None);
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (stripped.find(open), stripped.rfind(close)) {
            if start < end {
                let sliced = parse(&stripped[start..=end]);
                if !sliced.is_empty() {
                    return (sliced, None);
                }
            }
        }
    }

    (Vec::new(), Some("json_parse_failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MemoryPolicy {
        serde_json::from_value(serde_json::json!({
            "enabled": true,
            "scopes": ["persona_room"],
            "allow_categories": ["room_lore", "user_profile"],
            "write_rules": {"min_confidence": 0.5},
            "ttl_days_default": 30,
            "redaction": {"enabled": true}
        }))
        .unwrap()
    }

    fn extractor() -> MemoryExtractor {
        MemoryExtractor::new(policy(), ExtractStrategy::Heuristic, None, None, 5, false)
    }

    fn ctx(content: &str) -> ExtractContext {
        ExtractContext {
            content: content.into(),
            room_id: "room:demo".into(),
            persona_id: Some("clipgoblin".into()),
            message_id: Some("m-1".into()),
            origin: Some("human".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn heuristic_extracts_streamer_disclosure() {
        let outcome = extractor().extract(&ctx("fyi the streamer is called Captain")).await;
        assert_eq!(outcome.accepted.len(), 1);
        let item = &outcome.accepted[0];
        assert_eq!(item.subject, "streamer_name");
        assert_eq!(item.value, "Captain");
        assert_eq!(item.scope_key, "room:demo:clipgoblin");
        assert_eq!(item.ttl_days, 30);
    }

    #[tokio::test]
    async fn unremarkable_chat_yields_nothing() {
        let outcome = extractor().extract(&ctx("lol that was close")).await;
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("no_items_accepted"));
    }

    #[tokio::test]
    async fn redaction_empties_value_and_rejects() {
        // value is purely a phone number, so redaction leaves nothing behind
        let outcome = extractor().extract(&ctx("my name is 555-123-4567")).await;
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.redacted, 1);
    }

    #[test]
    fn candidate_parsing_handles_wrappers_and_prose() {
        let (items, err) = extract_json_candidates(r#"[{"a":1},{"b":2}]"#);
        assert_eq!(items.len(), 2);
        assert!(err.is_none());

        let (items, _) = extract_json_candidates(r#"{"items":[{"a":1}]}"#);
        assert_eq!(items.len(), 1);

        let (items, _) = extract_json_candidates("sure! here you go: [{\"a\":1}] hope that helps");
        assert_eq!(items.len(), 1);

        let (items, err) = extract_json_candidates("no json here");
        assert!(items.is_empty());
        assert_eq!(err, Some("json_parse_failed"));
    }
}
