//! Room and persona configuration files.
//!
//! Immutable at process start. Unknown keys are ignored; missing optional
//! blocks fall back to defaults.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config not found at {0}")]
    NotFound(String),

    #[error("failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("invalid config {path}: {reason}")]
    Invalid { path: String, reason: String },
}

fn default_max_chars() -> usize {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonaSafety {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for PersonaSafety {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

/// Voice anchor: what the persona sounds like.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaAnchor {
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub voice_rules: Vec<String>,
    #[serde(default)]
    pub catchphrases: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaPresentation {
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub style: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonaConfig {
    pub persona_id: String,
    pub display_name: String,
    #[serde(default)]
    pub safety: PersonaSafety,
    #[serde(default)]
    pub anchor: PersonaAnchor,
    #[serde(default)]
    pub presentation: PersonaPresentation,
}

impl PersonaConfig {
    /// Short profile block injected into LLM prompts.
    pub fn profile_text(&self) -> String {
        let mut lines = Vec::new();
        if let Some(bio) = &self.anchor.bio {
            if !bio.trim().is_empty() {
                lines.push(format!("bio: {}", bio.trim()));
            }
        }
        for rule in &self.anchor.voice_rules {
            lines.push(format!("voice: {rule}"));
        }
        if !self.anchor.catchphrases.is_empty() {
            lines.push(format!(
                "catchphrases: {}",
                self.anchor.catchphrases.join(" | ")
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomTiming {
    #[serde(default)]
    pub soft_cooldown_ms: Option<i64>,
    #[serde(default)]
    pub hard_cooldown_ms: Option<i64>,
    #[serde(default)]
    pub max_bot_msgs_per_10s: Option<usize>,
    #[serde(default)]
    pub max_react_age_s: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmotePolicy {
    #[serde(default)]
    pub allowed_emotes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    pub room_id: String,
    #[serde(default)]
    pub enabled_personas: Vec<String>,
    #[serde(default)]
    pub timing: RoomTiming,
    #[serde(default)]
    pub emote_policy: EmotePolicy,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

pub fn load_room_config(path: &Path) -> Result<RoomConfig, ConfigError> {
    let config: RoomConfig = read_json(path)?;
    if config.room_id.trim().is_empty() {
        return Err(ConfigError::Invalid {
            path: path.display().to_string(),
            reason: "room_id must not be empty".to_string(),
        });
    }
    Ok(config)
}

/// Load every persona JSON in `dir`, keeping only the enabled ids. The map
/// is ordered by persona id, which fixes evaluation order.
pub fn load_persona_configs(
    dir: &Path,
    enabled: &[String],
) -> Result<BTreeMap<String, PersonaConfig>, ConfigError> {
    if !dir.exists() {
        return Err(ConfigError::NotFound(dir.display().to_string()));
    }
    let mut personas = BTreeMap::new();
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Unreadable {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let config: PersonaConfig = read_json(&path)?;
        if config.persona_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                path: path.display().to_string(),
                reason: "persona_id must not be empty".to_string(),
            });
        }
        if enabled.iter().any(|id| id == &config.persona_id) {
            personas.insert(config.persona_id.clone(), config);
        }
    }
    if personas.is_empty() {
        warn!("no enabled personas found; service will not publish messages");
    }
    Ok(personas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_defaults_fill_in() {
        let json = r#"{"persona_id": "clipgoblin", "display_name": "ClipGoblin"}"#;
        let p: PersonaConfig = serde_json::from_str(json).unwrap();
        assert_eq!(p.safety.max_chars, 200);
        assert!(p.anchor.catchphrases.is_empty());
    }

    #[test]
    fn loads_only_enabled_personas_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        for (id, name) in [("zeta", "Zeta"), ("alpha", "Alpha"), ("omitted", "Om")] {
            std::fs::write(
                dir.path().join(format!("{id}.json")),
                serde_json::json!({"persona_id": id, "display_name": name}).to_string(),
            )
            .unwrap();
        }
        let personas = load_persona_configs(
            dir.path(),
            &["zeta".to_string(), "alpha".to_string()],
        )
        .unwrap();
        let ids: Vec<&String> = personas.keys().collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn room_config_requires_room_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.json");
        std::fs::write(&path, r#"{"room_id": "  "}"#).unwrap();
        assert!(load_room_config(&path).is_err());
    }
}
