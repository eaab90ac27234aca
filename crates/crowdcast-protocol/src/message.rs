use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Who authored a chat message. Closed set — anything else fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Human,
    Bot,
}

/// What the gateway's safety pipeline decided. `Allow` and `Redact` are the
/// only outcomes; content that redacts to nothing is dropped, never blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Allow,
    Redact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moderation {
    pub action: ModerationAction,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub redactions: Vec<String>,
}

/// Provenance of a message as it moves through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_instance: Option<String>,
}

/// The canonical envelope on `ingest` and `firehose`.
///
/// Immutable once the gateway has emitted it. Unknown JSON keys are ignored
/// on input and never round-tripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,

    pub id: String,
    /// ISO-8601 with timezone, e.g. `2024-05-01T12:00:00Z`.
    pub ts: String,
    pub room_id: String,
    pub origin: Origin,
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badges: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation: Option<Moderation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
}

impl ChatMessage {
    /// Parse `ts` as RFC3339. `None` when the timestamp is malformed.
    pub fn parsed_ts(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.ts).ok()
    }

    /// Milliseconds since the Unix epoch, when `ts` parses.
    pub fn ts_ms(&self) -> Option<i64> {
        self.parsed_ts().map(|dt| dt.timestamp_millis())
    }

    pub fn is_bot(&self) -> bool {
        self.origin == Origin::Bot
    }
}
