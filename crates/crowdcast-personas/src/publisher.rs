//! Bot message construction and publication.

use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crowdcast_bus::StreamBus;
use crowdcast_protocol::{
    validate, ChatMessage, Origin, Trace, CHAT_MESSAGE_SCHEMA, SCHEMA_VERSION,
};

use crate::configs::PersonaConfig;

/// Assemble a bot-origin ChatMessage ready for the ingest stream.
pub fn build_bot_message(
    persona: &PersonaConfig,
    room_id: &str,
    content: &str,
    worker_instance: &str,
    producer: &str,
) -> ChatMessage {
    ChatMessage {
        schema_name: Some(CHAT_MESSAGE_SCHEMA.to_string()),
        schema_version: Some(SCHEMA_VERSION.to_string()),
        id: uuid::Uuid::new_v4().simple().to_string(),
        ts: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        room_id: room_id.to_string(),
        origin: Origin::Bot,
        content: content.to_string(),
        user_id: Some(persona.persona_id.clone()),
        display_name: Some(persona.display_name.clone()),
        reply_to: None,
        mentions: Some(vec![]),
        emotes: Some(vec![]),
        badges: Some(persona.presentation.badges.clone()),
        style: persona.presentation.style.clone(),
        client_meta: None,
        moderation: None,
        trace: Some(Trace {
            producer: Some(producer.to_string()),
            processed_by: None,
            gateway_ts: None,
            persona_id: Some(persona.persona_id.clone()),
            worker_instance: Some(worker_instance.to_string()),
        }),
    }
}

/// Validate and append the message to `ingest`. Returns `true` only when the
/// append succeeded — the caller's budget and cooldown updates hang off this.
pub async fn publish_chat_message(
    bus: &mut StreamBus,
    ingest_stream: &str,
    message: &ChatMessage,
) -> bool {
    if let Err(e) = validate::validate_chat_message(message) {
        warn!(error = %e, "generated message failed validation; not publishing");
        return false;
    }
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize generated message");
            return false;
        }
    };
    match bus.append(ingest_stream, &json).await {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "failed to publish generated message");
            false
        }
    }
}
