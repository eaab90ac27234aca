use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// A captured video frame on `stream:frames`. The referenced file must hash
/// to `sha256` byte-for-byte before the perceiver will look at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,

    pub id: String,
    pub ts: String,
    pub room_id: String,
    pub frame_path: String,
    pub sha256: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub seq: u64,
    pub capture_ms: i64,
}

impl StreamFrame {
    pub fn ts_ms(&self) -> Option<i64> {
        DateTime::parse_from_rfc3339(&self.ts)
            .ok()
            .map(|dt| dt.timestamp_millis())
    }
}

/// One ASR segment on `stream:transcripts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTranscriptSegment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,

    pub id: String,
    pub ts: String,
    pub room_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl StreamTranscriptSegment {
    pub fn ts_ms(&self) -> Option<i64> {
        DateTime::parse_from_rfc3339(&self.ts)
            .ok()
            .map(|dt| dt.timestamp_millis())
    }
}

/// Fixed record of content-safety booleans. A fixed struct rather than a map
/// so absent flags cannot sneak through as "unknown".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyFlags {
    pub sexual: bool,
    pub violence: bool,
    pub self_harm: bool,
    pub hate: bool,
    pub harassment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationTrace {
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    pub prompt_id: String,
    pub prompt_sha256: String,
}

/// Structured summary of a frame plus its joined transcript segments,
/// emitted by the perceiver on `stream:observations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,

    pub id: String,
    pub ts: String,
    pub room_id: String,
    pub frame_id: String,
    pub frame_sha256: String,
    /// Segment ids in join order; must match the segments the perceiver sent.
    pub transcript_ids: Vec<String>,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    pub hype_level: f64,
    pub safety: SafetyFlags,
    pub trace: ObservationTrace,
}

impl StreamObservation {
    pub fn ts_ms(&self) -> Option<i64> {
        DateTime::parse_from_rfc3339(&self.ts)
            .ok()
            .map(|dt| dt.timestamp_millis())
    }
}
