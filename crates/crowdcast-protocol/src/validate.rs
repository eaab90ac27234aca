//! Payload validation.
//!
//! Typed deserialization already rejects structurally wrong payloads (closed
//! enums, missing required fields). The checks here enforce the invariants
//! serde cannot express: non-empty identifiers, parseable timestamps, value
//! ranges, and cross-field rules like "bot messages carry a persona id".

use chrono::DateTime;
use thiserror::Error;

use crate::message::{ChatMessage, Origin};
use crate::stream::{StreamFrame, StreamObservation, StreamTranscriptSegment};

/// Hard upper bound on inbound content length, before the gateway truncates
/// to its configured limit.
pub const MAX_CONTENT_CHARS: usize = 4096;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn invalid(kind: &'static str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::Invalid {
        kind,
        reason: reason.into(),
    }
}

fn require(kind: &'static str, field: &str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(invalid(kind, format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_ts(kind: &'static str, ts: &str) -> Result<(), ProtocolError> {
    DateTime::parse_from_rfc3339(ts)
        .map_err(|e| invalid(kind, format!("ts is not RFC3339: {e}")))?;
    Ok(())
}

fn require_sha256(kind: &'static str, field: &str, value: &str) -> Result<(), ProtocolError> {
    if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid(kind, format!("{field} must be 64 hex chars")));
    }
    Ok(())
}

pub fn validate_chat_message(msg: &ChatMessage) -> Result<(), ProtocolError> {
    const KIND: &str = "ChatMessage";
    require(KIND, "id", &msg.id)?;
    require(KIND, "room_id", &msg.room_id)?;
    require_ts(KIND, &msg.ts)?;
    if msg.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(invalid(
            KIND,
            format!("content exceeds {MAX_CONTENT_CHARS} chars"),
        ));
    }
    if msg.origin == Origin::Bot {
        let has_persona = msg
            .trace
            .as_ref()
            .and_then(|t| t.persona_id.as_deref())
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false);
        if !has_persona {
            return Err(invalid(KIND, "bot-origin message missing trace.persona_id"));
        }
    }
    Ok(())
}

pub fn validate_stream_frame(frame: &StreamFrame) -> Result<(), ProtocolError> {
    const KIND: &str = "StreamFrame";
    require(KIND, "id", &frame.id)?;
    require(KIND, "room_id", &frame.room_id)?;
    require(KIND, "frame_path", &frame.frame_path)?;
    require_ts(KIND, &frame.ts)?;
    require_sha256(KIND, "sha256", &frame.sha256)?;
    Ok(())
}

pub fn validate_transcript_segment(
    seg: &StreamTranscriptSegment,
) -> Result<(), ProtocolError> {
    const KIND: &str = "StreamTranscriptSegment";
    require(KIND, "id", &seg.id)?;
    require(KIND, "room_id", &seg.room_id)?;
    require_ts(KIND, &seg.ts)?;
    if seg.start_ms > seg.end_ms {
        return Err(invalid(KIND, "start_ms must be <= end_ms"));
    }
    if let Some(c) = seg.confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(invalid(KIND, "confidence must be within [0, 1]"));
        }
    }
    Ok(())
}

pub fn validate_stream_observation(obs: &StreamObservation) -> Result<(), ProtocolError> {
    const KIND: &str = "StreamObservation";
    require(KIND, "id", &obs.id)?;
    require(KIND, "room_id", &obs.room_id)?;
    require(KIND, "frame_id", &obs.frame_id)?;
    require_ts(KIND, &obs.ts)?;
    require_sha256(KIND, "frame_sha256", &obs.frame_sha256)?;
    if !(0.0..=1.0).contains(&obs.hype_level) {
        return Err(invalid(KIND, "hype_level must be within [0, 1]"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Trace;

    fn base_message() -> ChatMessage {
        ChatMessage {
            schema_name: None,
            schema_version: None,
            id: "m-1".into(),
            ts: "2024-05-01T12:00:00Z".into(),
            room_id: "room:demo".into(),
            origin: Origin::Human,
            content: "hello".into(),
            user_id: None,
            display_name: None,
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

    #[test]
    fn accepts_minimal_human_message() {
        assert!(validate_chat_message(&base_message()).is_ok());
    }

    #[test]
    fn rejects_empty_id() {
        let mut msg = base_message();
        msg.id = "  ".into();
        assert!(validate_chat_message(&msg).is_err());
    }

    #[test]
    fn rejects_bad_timestamp() {
        let mut msg = base_message();
        msg.ts = "yesterday".into();
        assert!(validate_chat_message(&msg).is_err());
    }

    #[test]
    fn bot_message_requires_persona_id() {
        let mut msg = base_message();
        msg.origin = Origin::Bot;
        assert!(validate_chat_message(&msg).is_err());

        msg.trace = Some(Trace {
            persona_id: Some("clipgoblin".into()),
            ..Default::default()
        });
        assert!(validate_chat_message(&msg).is_ok());
    }

    #[test]
    fn transcript_rejects_inverted_span() {
        let seg = StreamTranscriptSegment {
            schema_name: None,
            schema_version: None,
            id: "t-1".into(),
            ts: "2024-05-01T12:00:00Z".into(),
            room_id: "room:demo".into(),
            start_ms: 100,
            end_ms: 50,
            text: "hi".into(),
            confidence: None,
        };
        assert!(validate_transcript_segment(&seg).is_err());
    }
}
