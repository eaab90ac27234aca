use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Value length ceiling after redaction.
pub const MAX_VALUE_CHARS: usize = 256;

/// How a memory item is addressed. The scope decides the shape of its
/// `scope_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    /// `<persona_id>`
    Persona,
    /// `<room_id>:<persona_id>`
    PersonaRoom,
    /// `<room_id>:<persona_id>:<user_id>`
    PersonaUser,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Persona => "persona",
            MemoryScope::PersonaRoom => "persona_room",
            MemoryScope::PersonaUser => "persona_user",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySource {
    pub kind: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,

    pub id: String,
    pub ts: String,
    pub scope: MemoryScope,
    pub scope_key: String,
    pub category: String,
    pub subject: String,
    pub value: String,
    pub confidence: f64,
    /// 0 encodes "not set"; the write policy fills in the default.
    #[serde(default)]
    pub ttl_days: i64,
    pub source: MemorySource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redactions: Vec<String>,
}

impl MemoryItem {
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.id.trim().is_empty() {
            return Err(MemoryError::InvalidItem("id must not be empty".into()));
        }
        if self.subject.trim().is_empty() {
            return Err(MemoryError::InvalidItem("subject must not be empty".into()));
        }
        if self.scope_key.trim().is_empty() {
            return Err(MemoryError::InvalidItem(
                "scope_key must not be empty".into(),
            ));
        }
        if DateTime::parse_from_rfc3339(&self.ts).is_err() {
            return Err(MemoryError::InvalidItem(format!(
                "ts is not RFC3339: {}",
                self.ts
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(MemoryError::InvalidItem(
                "confidence must be within [0, 1]".into(),
            ));
        }
        if self.ttl_days < 1 {
            return Err(MemoryError::InvalidItem("ttl_days must be >= 1".into()));
        }
        if self.value.chars().count() > MAX_VALUE_CHARS {
            return Err(MemoryError::InvalidItem(format!(
                "value exceeds {MAX_VALUE_CHARS} chars"
            )));
        }
        Ok(())
    }

    pub fn ts_ms(&self) -> i64 {
        DateTime::parse_from_rfc3339(&self.ts)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(i64::MIN)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryQueryResult {
    pub items: Vec<MemoryItem>,
    /// Total rows that matched before the limit was applied.
    pub matched: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn item(id: &str, subject: &str, value: &str) -> MemoryItem {
        MemoryItem {
            schema_name: None,
            schema_version: None,
            id: id.into(),
            ts: "2024-05-01T12:00:00Z".into(),
            scope: MemoryScope::PersonaRoom,
            scope_key: "room:demo:clipgoblin".into(),
            category: "room_lore".into(),
            subject: subject.into(),
            value: value.into(),
            confidence: 0.9,
            ttl_days: 14,
            source: MemorySource {
                kind: "chat_message".into(),
                ..Default::default()
            },
            redactions: vec![],
        }
    }

    #[test]
    fn valid_item_passes() {
        assert!(item("m1", "streamer_name", "Captain").validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let mut bad = item("m1", "s", "v");
        bad.confidence = 1.5;
        assert!(bad.validate().is_err());

        let mut bad = item("m1", "s", "v");
        bad.ttl_days = 0;
        assert!(bad.validate().is_err());

        let mut bad = item("m1", "s", "v");
        bad.value = "x".repeat(MAX_VALUE_CHARS + 1);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn scope_serializes_snake_case() {
        let json = serde_json::to_string(&MemoryScope::PersonaRoom).unwrap();
        assert_eq!(json, "\"persona_room\"");
    }
}
