// Verify the JSON wire format stays compatible with what producers and
// push-channel clients already emit and expect.

use crowdcast_protocol::{
    validate, ChatMessage, Moderation, ModerationAction, Origin, SafetyFlags, StreamObservation,
};

#[test]
fn chat_message_round_trip() {
    let json = r#"{
        "schema_name": "ChatMessage",
        "schema_version": "1.0.0",
        "id": "abc123",
        "ts": "2024-05-01T12:00:00Z",
        "room_id": "room:demo",
        "origin": "human",
        "content": "hello chat",
        "user_id": "u-9",
        "display_name": "viewer9",
        "trace": {"producer": "web", "processed_by": ["chat_gateway"]}
    }"#;
    let msg: ChatMessage = serde_json::from_str(json).unwrap();
    assert_eq!(msg.origin, Origin::Human);
    assert_eq!(msg.ts_ms(), Some(1_714_564_800_000));

    let out = serde_json::to_string(&msg).unwrap();
    let back: ChatMessage = serde_json::from_str(&out).unwrap();
    assert_eq!(msg, back);
}

#[test]
fn absent_optionals_stay_off_the_wire() {
    let json = r#"{"id":"m","ts":"2024-05-01T12:00:00Z","room_id":"r","origin":"bot","content":"x"}"#;
    let msg: ChatMessage = serde_json::from_str(json).unwrap();
    let out = serde_json::to_string(&msg).unwrap();
    assert!(!out.contains("reply_to"));
    assert!(!out.contains("moderation"));
    assert!(!out.contains("trace"));
}

#[test]
fn unknown_keys_are_ignored() {
    let json = r#"{"id":"m","ts":"2024-05-01T12:00:00Z","room_id":"r","origin":"human",
                   "content":"x","some_future_field":{"a":1}}"#;
    assert!(serde_json::from_str::<ChatMessage>(json).is_ok());
}

#[test]
fn origin_is_a_closed_set() {
    let json = r#"{"id":"m","ts":"2024-05-01T12:00:00Z","room_id":"r","origin":"system","content":"x"}"#;
    assert!(serde_json::from_str::<ChatMessage>(json).is_err());
}

#[test]
fn moderation_action_serializes_lowercase() {
    let m = Moderation {
        action: ModerationAction::Redact,
        reasons: vec!["phone".into()],
        redactions: vec![],
    };
    let json = serde_json::to_string(&m).unwrap();
    assert!(json.contains(r#""action":"redact""#));
    assert!(serde_json::from_str::<Moderation>(r#"{"action":"block"}"#).is_err());
}

#[test]
fn observation_round_trip_and_validation() {
    let json = r#"{
        "id": "obs-1",
        "ts": "2024-05-01T12:00:05Z",
        "room_id": "room:demo",
        "frame_id": "frame-77",
        "frame_sha256": "0f0e0d0c0b0a09080706050403020100ffeeddccbbaa99887766554433221100",
        "transcript_ids": ["t-1", "t-2"],
        "summary": "big play on screen",
        "tags": ["hype"],
        "entities": ["streamer"],
        "hype_level": 0.8,
        "safety": {"sexual": false, "violence": false, "self_harm": false, "hate": false, "harassment": false},
        "trace": {"provider": "stub", "model": "stub", "latency_ms": 1,
                  "prompt_id": "stream_observation_v1", "prompt_sha256": "abc"}
    }"#;
    let obs: StreamObservation = serde_json::from_str(json).unwrap();
    assert_eq!(obs.safety, SafetyFlags::default());
    assert!(validate::validate_stream_observation(&obs).is_ok());

    let mut hyped = obs.clone();
    hyped.hype_level = 1.4;
    assert!(validate::validate_stream_observation(&hyped).is_err());
}
