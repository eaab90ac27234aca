//! Observation context rendering.
//!
//! Buffered observations are formatted into a bounded text block injected
//! into LLM prompts. The line layout comes from a template with named
//! placeholders; segments the config disables render as empty strings.

use std::path::Path;

use serde::Deserialize;

use crate::configs::ConfigError;
use crate::state::ObservationEntry;

const KNOWN_PLACEHOLDERS: [&str; 6] = ["prefix", "ts", "summary", "tags", "entities", "hype"];

fn default_max_items() -> usize {
    5
}
fn default_max_age_ms() -> i64 {
    120_000
}
fn default_max_chars() -> usize {
    900
}
fn bool_true() -> bool {
    true
}
fn default_prefix() -> String {
    "OBS:".to_string()
}
fn default_header() -> String {
    "Recent stream observations:".to_string()
}
fn default_line_template() -> String {
    "{prefix}{ts}{summary}{tags}{entities}{hype}".to_string()
}
fn default_truncate_suffix() -> String {
    "…".to_string()
}
fn default_format_version() -> String {
    "v1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservationContextConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: i64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "bool_true")]
    pub include_tags: bool,
    #[serde(default = "bool_true")]
    pub include_entities: bool,
    #[serde(default = "bool_true")]
    pub include_hype: bool,
    #[serde(default = "bool_true")]
    pub include_ts: bool,
    #[serde(default = "default_format_version")]
    pub format_version: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_header")]
    pub header: String,
    #[serde(default = "default_line_template")]
    pub line_template: String,
    #[serde(default = "default_truncate_suffix")]
    pub truncate_suffix: String,
}

impl Default for ObservationContextConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl ObservationContextConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: ObservationContextConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        config.validate().map_err(|reason| ConfigError::Invalid {
            path: path.display().to_string(),
            reason,
        })?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.format_version != "v1" {
            return Err(format!(
                "unsupported format_version: {}",
                self.format_version
            ));
        }
        // every {placeholder} in the template must be known
        let mut rest = self.line_template.as_str();
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                return Err("line_template has an unclosed placeholder".to_string());
            };
            let name = &rest[start + 1..start + len];
            if !KNOWN_PLACEHOLDERS.contains(&name) {
                return Err(format!("line_template references unknown placeholder {name}"));
            }
            rest = &rest[start + len + 1..];
        }
        if !self.line_template.contains("{summary}") {
            return Err("line_template must include {summary}".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObservationContextResult {
    pub context_text: String,
    pub included_observation_ids: Vec<String>,
    pub chars_included: usize,
}

fn sanitize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn format_line(entry: &ObservationEntry, config: &ObservationContextConfig) -> String {
    let obs = &entry.observation;
    let summary = {
        let s = sanitize(&obs.summary);
        if s.is_empty() {
            "(no transcript)".to_string()
        } else {
            s
        }
    };

    let prefix_segment = if config.prefix.is_empty() {
        String::new()
    } else {
        format!("{} ", config.prefix)
    };
    let ts_segment = if config.include_ts && !obs.ts.trim().is_empty() {
        format!("{} | ", obs.ts.trim())
    } else {
        String::new()
    };
    let tags_segment = if config.include_tags && !obs.tags.is_empty() {
        let tags: Vec<String> = obs
            .tags
            .iter()
            .map(|t| sanitize(t))
            .filter(|t| !t.is_empty())
            .collect();
        if tags.is_empty() {
            String::new()
        } else {
            format!(" | tags={}", tags.join(","))
        }
    } else {
        String::new()
    };
    let entities_segment = if config.include_entities && !obs.entities.is_empty() {
        let entities: Vec<String> = obs
            .entities
            .iter()
            .map(|e| sanitize(e))
            .filter(|e| !e.is_empty())
            .collect();
        if entities.is_empty() {
            String::new()
        } else {
            format!(" | entities={}", entities.join(","))
        }
    } else {
        String::new()
    };
    let hype_segment = if config.include_hype {
        format!(" | hype={:.2}", obs.hype_level)
    } else {
        String::new()
    };

    config
        .line_template
        .replace("{prefix}", &prefix_segment)
        .replace("{ts}", &ts_segment)
        .replace("{summary}", &summary)
        .replace("{tags}", &tags_segment)
        .replace("{entities}", &entities_segment)
        .replace("{hype}", &hype_segment)
        .trim()
        .to_string()
}

fn truncate_block(text: &str, max_chars: usize, suffix: &str) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let suffix_len = suffix.chars().count();
    if suffix.is_empty() || max_chars <= suffix_len {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - suffix_len).collect();
    out.push_str(suffix);
    out
}

/// Render the newest observations for `room_id` into a prompt block.
pub fn format_observation_context(
    entries: &[ObservationEntry],
    room_id: &str,
    reference_ts_ms: i64,
    config: &ObservationContextConfig,
) -> ObservationContextResult {
    if entries.is_empty() || config.max_items == 0 || config.max_chars == 0 {
        return ObservationContextResult::default();
    }

    let mut filtered: Vec<&ObservationEntry> = entries
        .iter()
        .filter(|e| e.observation.room_id == room_id)
        .filter(|e| config.max_age_ms < 0 || reference_ts_ms - e.ts_ms <= config.max_age_ms)
        .collect();
    if filtered.is_empty() {
        return ObservationContextResult::default();
    }

    // newest first, id as the stable tie-break
    filtered.sort_by(|a, b| {
        b.ts_ms
            .cmp(&a.ts_ms)
            .then_with(|| a.observation.id.cmp(&b.observation.id))
    });
    filtered.truncate(config.max_items);

    let mut lines = Vec::new();
    let mut ids = Vec::new();
    for entry in &filtered {
        ids.push(if entry.observation.id.is_empty() {
            entry.bus_id.clone()
        } else {
            entry.observation.id.clone()
        });
        lines.push(format_line(entry, config));
    }

    let block = if config.header.is_empty() {
        lines.join("\n")
    } else {
        format!("{}\n{}", config.header, lines.join("\n"))
    };
    let truncated = truncate_block(&block, config.max_chars, &config.truncate_suffix);
    let chars_included = truncated.chars().count();
    ObservationContextResult {
        context_text: truncated,
        included_observation_ids: ids,
        chars_included,
    }
}
