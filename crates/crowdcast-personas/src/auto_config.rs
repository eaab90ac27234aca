//! Auto-commentary configuration file.

use std::path::Path;

use serde::Deserialize;

use crate::configs::ConfigError;

fn default_hype_threshold() -> f64 {
    0.6
}
fn default_room_rate_limit_ms() -> i64 {
    8_000
}
fn default_persona_cooldown_ms() -> i64 {
    15_000
}
fn default_max_messages_per_observation() -> usize {
    1
}
fn default_dedupe_window_ms() -> i64 {
    60_000
}
fn default_max_reply_chars() -> usize {
    200
}
fn bool_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MomentumConfig {
    #[serde(default = "MomentumConfig::default_window_ms")]
    pub window_ms: i64,
    #[serde(default = "MomentumConfig::default_max_msgs")]
    pub max_msgs: usize,
    #[serde(default = "MomentumConfig::default_min_interval_ms")]
    pub min_interval_ms: i64,
}

impl MomentumConfig {
    fn default_window_ms() -> i64 {
        30_000
    }
    fn default_max_msgs() -> usize {
        3
    }
    fn default_min_interval_ms() -> i64 {
        4_000
    }
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            window_ms: Self::default_window_ms(),
            max_msgs: Self::default_max_msgs(),
            min_interval_ms: Self::default_min_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterestWeights {
    #[serde(default = "InterestWeights::default_hype")]
    pub hype: f64,
    #[serde(default = "InterestWeights::default_mentions")]
    pub mentions: f64,
    #[serde(default = "InterestWeights::default_entities")]
    pub entities: f64,
    #[serde(default = "InterestWeights::default_tag_hype")]
    pub tag_hype: f64,
}

impl InterestWeights {
    fn default_hype() -> f64 {
        1.0
    }
    fn default_mentions() -> f64 {
        0.3
    }
    fn default_entities() -> f64 {
        0.3
    }
    fn default_tag_hype() -> f64 {
        0.2
    }
}

impl Default for InterestWeights {
    fn default() -> Self {
        Self {
            hype: Self::default_hype(),
            mentions: Self::default_mentions(),
            entities: Self::default_entities(),
            tag_hype: Self::default_tag_hype(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryDedupeConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "SummaryDedupeConfig::default_ttl_ms")]
    pub ttl_ms: i64,
    #[serde(default = "bool_true")]
    pub normalize: bool,
}

impl SummaryDedupeConfig {
    fn default_ttl_ms() -> i64 {
        120_000
    }
}

impl Default for SummaryDedupeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: Self::default_ttl_ms(),
            normalize: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MentionTargetingConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "MentionTargetingConfig::default_boost")]
    pub boost: f64,
}

impl MentionTargetingConfig {
    fn default_boost() -> f64 {
        0.25
    }
}

impl Default for MentionTargetingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            boost: Self::default_boost(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonaDiversityConfig {
    #[serde(default = "PersonaDiversityConfig::default_avoid_repeat_last_n")]
    pub avoid_repeat_last_n: usize,
}

impl PersonaDiversityConfig {
    fn default_avoid_repeat_last_n() -> usize {
        2
    }
}

impl Default for PersonaDiversityConfig {
    fn default() -> Self {
        Self {
            avoid_repeat_last_n: Self::default_avoid_repeat_last_n(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoCommentaryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_hype_threshold")]
    pub hype_threshold: f64,
    #[serde(default)]
    pub trigger_tags: Vec<String>,
    #[serde(default = "bool_true")]
    pub trigger_on_entities: bool,
    #[serde(default = "default_persona_cooldown_ms")]
    pub persona_cooldown_ms: i64,
    #[serde(default = "default_room_rate_limit_ms")]
    pub room_rate_limit_ms: i64,
    #[serde(default = "default_max_messages_per_observation")]
    pub max_messages_per_observation: usize,
    #[serde(default = "default_dedupe_window_ms")]
    pub dedupe_window_ms: i64,
    #[serde(default)]
    pub message_prefix: String,
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
    #[serde(default)]
    pub include_obs_id: bool,
    #[serde(default)]
    pub momentum: MomentumConfig,
    #[serde(default)]
    pub interest_weights: InterestWeights,
    #[serde(default)]
    pub summary_dedupe: SummaryDedupeConfig,
    #[serde(default)]
    pub mention_targeting: MentionTargetingConfig,
    #[serde(default)]
    pub persona_diversity: PersonaDiversityConfig,
}

impl AutoCommentaryConfig {
    pub fn load(path: &Path, enabled_override: Option<bool>) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut config: AutoCommentaryConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if let Some(enabled) = enabled_override {
            config.enabled = enabled;
        }
        config.trigger_tags = normalize_tokens(&config.trigger_tags);
        config.validate().map_err(|reason| ConfigError::Invalid {
            path: path.display().to_string(),
            reason: reason.to_string(),
        })?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), &'static str> {
        if !(0.0..=1.0).contains(&self.hype_threshold) {
            return Err("hype_threshold must be within [0, 1]");
        }
        if self.room_rate_limit_ms < 0 || self.dedupe_window_ms < 0 {
            return Err("rate limits must be non-negative");
        }
        if self.momentum.window_ms <= 0 || self.momentum.min_interval_ms < 0 {
            return Err("momentum window must be positive");
        }
        Ok(())
    }
}

/// Lowercase, trim, and dedupe while preserving first-seen order.
pub fn normalize_tokens<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let cleaned = item.as_ref().trim().to_lowercase();
        if cleaned.is_empty() || !seen.insert(cleaned.clone()) {
            continue;
        }
        out.push(cleaned);
    }
    out
}
