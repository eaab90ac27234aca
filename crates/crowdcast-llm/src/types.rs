use serde_json::Value;

/// Everything a provider may need to produce one reply.
///
/// `system_prompt`/`user_prompt` are filled by the renderer before the
/// request reaches a provider; the remaining fields feed rendering and the
/// stub's fixture keying.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub persona_id: String,
    pub persona_display_name: String,
    pub room_id: String,
    pub content: String,
    pub marker: Option<String>,
    pub recent_messages: Vec<String>,
    pub tags: Value,
    pub memory_context: String,
    pub observation_context: String,
    pub observation_summary: String,
    pub persona_profile: String,
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub provider: String,
    pub model: Option<String>,
}
