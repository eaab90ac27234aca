//! Sanitization, moderation, and trace enrichment.
//!
//! Order matters: validate happened upstream, then content is flattened to a
//! single line and bounded, then moderation patterns rewrite it. Content that
//! ends up empty at either stage drops the message entirely — moderation
//! never escalates past `redact`.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crowdcast_protocol::{ChatMessage, Moderation, ModerationAction, Trace};

pub const GATEWAY_PROCESSOR: &str = "chat_gateway";

#[derive(Deserialize)]
struct ModerationFile {
    #[serde(default)]
    pii_patterns: Vec<RawPattern>,
}

#[derive(Deserialize)]
struct RawPattern {
    kind: String,
    regex: String,
    replacement: String,
}

struct ModerationPattern {
    kind: String,
    regex: Regex,
    replacement: String,
}

pub struct SafetyPipeline {
    max_length: usize,
    patterns: Vec<ModerationPattern>,
}

impl SafetyPipeline {
    /// A missing or unreadable moderation config logs a warning and disables
    /// redaction; it never fails startup.
    pub fn load(max_length: usize, moderation_config: Option<&Path>) -> Self {
        let patterns = match moderation_config {
            None => Vec::new(),
            Some(path) => match Self::load_patterns(path) {
                Ok(patterns) => {
                    info!(path = %path.display(), count = patterns.len(), "loaded moderation config");
                    patterns
                }
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "moderation config unavailable; continuing without redaction");
                    Vec::new()
                }
            },
        };
        Self {
            max_length,
            patterns,
        }
    }

    fn load_patterns(path: &Path) -> Result<Vec<ModerationPattern>, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let file: ModerationFile = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        let mut patterns = Vec::new();
        for p in file.pii_patterns {
            let regex = Regex::new(&p.regex)
                .map_err(|e| format!("pattern '{}' invalid: {e}", p.kind))?;
            patterns.push(ModerationPattern {
                kind: p.kind,
                regex,
                replacement: p.replacement,
            });
        }
        Ok(patterns)
    }

    /// CR/LF to spaces, trim, bound to the configured length (char-aware).
    pub fn sanitize(&self, content: &str) -> String {
        let flattened = content.replace(['\r', '\n'], " ");
        let trimmed = flattened.trim();
        trimmed.chars().take(self.max_length).collect()
    }

    /// Apply every pattern in order; reasons are the ordered distinct kinds
    /// that matched.
    pub fn moderate(&self, content: &str) -> (String, Moderation) {
        let mut moderated = content.to_string();
        let mut reasons: Vec<String> = Vec::new();
        for pattern in &self.patterns {
            if pattern.regex.is_match(&moderated) {
                if !reasons.iter().any(|r| r == &pattern.kind) {
                    reasons.push(pattern.kind.clone());
                }
                moderated = pattern
                    .regex
                    .replace_all(&moderated, pattern.replacement.as_str())
                    .into_owned();
            }
        }
        let action = if reasons.is_empty() {
            ModerationAction::Allow
        } else {
            ModerationAction::Redact
        };
        (
            moderated,
            Moderation {
                action,
                reasons,
                redactions: vec![],
            },
        )
    }

    /// Full pipeline. `None` means the message is dropped.
    pub fn process(&self, mut msg: ChatMessage) -> Option<ChatMessage> {
        let sanitized = self.sanitize(&msg.content);
        if sanitized.is_empty() {
            warn!(id = %msg.id, "dropping message with empty content after sanitization");
            return None;
        }

        let (moderated, moderation) = self.moderate(&sanitized);
        if moderation.action == ModerationAction::Redact && moderated.is_empty() {
            warn!(id = %msg.id, "dropping message with empty content after redaction");
            return None;
        }
        msg.content = moderated;
        msg.moderation = Some(moderation);
        enrich_trace(&mut msg);
        Some(msg)
    }
}

/// Ensure `trace.producer`, append ourselves to `processed_by`, and stamp
/// `gateway_ts` when absent.
fn enrich_trace(msg: &mut ChatMessage) {
    let trace = msg.trace.get_or_insert_with(Trace::default);
    if trace.producer.as_deref().map(str::trim).unwrap_or("").is_empty() {
        trace.producer = Some("unknown".to_string());
    }
    let processed_by = trace.processed_by.get_or_insert_with(Vec::new);
    if !processed_by.iter().any(|p| p == GATEWAY_PROCESSOR) {
        processed_by.push(GATEWAY_PROCESSOR.to_string());
    }
    if trace.gateway_ts.is_none() {
        trace.gateway_ts = Some(
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        );
    }
}
