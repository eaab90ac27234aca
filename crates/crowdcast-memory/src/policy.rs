//! Write policy.
//!
//! Every candidate item passes through [`should_store_item`] before it may
//! reach a store. Rejections come back as stable reason strings that feed the
//! worker's counters.

use std::path::Path;

use serde::Deserialize;

use crate::error::MemoryError;
use crate::types::MemoryItem;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WriteRules {
    #[serde(default)]
    pub min_confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedactionPattern {
    pub name: String,
    pub regex: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedactionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub patterns: Vec<RedactionPattern>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryPolicy {
    #[serde(default)]
    pub enabled: bool,
    /// Allowed scopes by name ("persona", "persona_room", "persona_user").
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub allow_categories: Vec<String>,
    #[serde(default)]
    pub deny_categories: Vec<String>,
    #[serde(default)]
    pub write_rules: WriteRules,
    /// Applied when an item has no TTL; also the enforced ceiling.
    #[serde(default)]
    pub ttl_days_default: Option<i64>,
    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl MemoryPolicy {
    pub fn load(path: &Path) -> Result<Self, MemoryError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        !scope.is_empty() && self.scopes.iter().any(|s| s == scope)
    }

    pub fn is_category_allowed(&self, category: &str) -> bool {
        if category.is_empty() {
            return false;
        }
        if self.deny_categories.iter().any(|c| c == category) {
            return false;
        }
        if !self.allow_categories.is_empty()
            && !self.allow_categories.iter().any(|c| c == category)
        {
            return false;
        }
        true
    }
}

/// Gate a candidate write. TTL handling mutates the item: a missing-but-
/// defaultable TTL is filled in, and TTLs above the ceiling are clamped.
/// (Items deserialized without `ttl_days` carry 0, treated as missing.)
pub fn should_store_item(policy: &MemoryPolicy, item: &mut MemoryItem) -> Result<(), &'static str> {
    if !policy.enabled {
        return Err("policy_disabled");
    }

    if !policy.is_scope_allowed(item.scope.as_str()) {
        return Err("scope_not_allowed");
    }

    if !policy.is_category_allowed(&item.category) {
        if policy.deny_categories.iter().any(|c| c == &item.category) {
            return Err("category_denied");
        }
        return Err("category_not_allowed");
    }

    if item.confidence < policy.write_rules.min_confidence {
        return Err("low_confidence");
    }

    if item.ttl_days == 0 {
        match policy.ttl_days_default {
            Some(default) => item.ttl_days = default,
            None => return Err("ttl_missing"),
        }
    } else {
        if item.ttl_days < 1 {
            return Err("ttl_invalid");
        }
        if let Some(default) = policy.ttl_days_default {
            if item.ttl_days > default {
                item.ttl_days = default;
            }
        }
    }

    Ok(())
}
