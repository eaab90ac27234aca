//! Prompt rendering.
//!
//! The system prompt always comes from the verified manifest (by explicit id
//! or by purpose default); the user prompt is assembled from the request in a
//! fixed block layout the prompts were written against.

use std::collections::HashMap;
use std::path::Path;

use crate::manifest::{self, ManifestError, PromptManifest};
use crate::types::LlmRequest;

pub const PURPOSE_PERSONA_REPLY: &str = "persona_reply";
pub const PURPOSE_AUTO_COMMENTARY: &str = "persona_auto_commentary";
pub const PURPOSE_MEMORY_EXTRACT: &str = "memory_extract";
pub const PURPOSE_STREAM_OBSERVATION: &str = "stream_observation";

pub struct PromptRenderer {
    pub manifest: PromptManifest,
    texts_by_id: HashMap<String, String>,
    default_id_by_purpose: HashMap<String, String>,
}

impl PromptRenderer {
    /// Load the manifest and verify every prompt digest; fatal on mismatch.
    pub fn load(manifest_path: &Path, base_dir: &Path) -> Result<Self, ManifestError> {
        let (manifest, texts_by_id) = manifest::load_verified(manifest_path, base_dir)?;

        // first manifest entry per purpose wins as the default
        let mut default_id_by_purpose = HashMap::new();
        for entry in &manifest.prompts {
            default_id_by_purpose
                .entry(entry.purpose.clone())
                .or_insert_with(|| entry.id.clone());
        }

        Ok(Self {
            manifest,
            texts_by_id,
            default_id_by_purpose,
        })
    }

    /// Manifest entry lookup by id, for trace fields.
    pub fn entry(&self, prompt_id: &str) -> Option<&manifest::PromptEntry> {
        self.manifest.prompts.iter().find(|p| p.id == prompt_id)
    }

    fn resolve(&self, purpose: &str, prompt_id: Option<&str>) -> Result<&str, ManifestError> {
        if let Some(id) = prompt_id {
            return self
                .texts_by_id
                .get(id)
                .map(String::as_str)
                .ok_or_else(|| ManifestError::UnknownPrompt(format!("id={id}")));
        }
        self.default_id_by_purpose
            .get(purpose)
            .and_then(|id| self.texts_by_id.get(id))
            .map(String::as_str)
            .ok_or_else(|| ManifestError::UnknownPrompt(format!("purpose={purpose}")))
    }

    fn format_recent(recent: &[String]) -> String {
        let lines: Vec<String> = recent
            .iter()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .filter_map(|msg| {
                let safe = msg.replace(['\n', '\r'], " ").trim().to_string();
                if safe.is_empty() {
                    None
                } else {
                    Some(format!("- {safe}"))
                }
            })
            .collect();
        if lines.is_empty() {
            "(none)".to_string()
        } else {
            lines.join("\n")
        }
    }

    fn or_none(value: &str) -> &str {
        if value.is_empty() {
            "None"
        } else {
            value
        }
    }

    pub fn render_persona_reply(
        &self,
        req: &LlmRequest,
        prompt_id: Option<&str>,
    ) -> Result<(String, String), ManifestError> {
        let system = self.resolve(PURPOSE_PERSONA_REPLY, prompt_id)?.to_string();
        let policy_tags = req.tags.to_string();
        let user = format!(
            "persona: {}\nroom: {}\npolicy_tags: {}\nPERSONA_PROFILE:\n{}\nTRIGGER_MESSAGE:\n{}\nRECENT_CHAT:\n{}\nOBSERVATION_SUMMARY:\n{}\nSTREAM_OBSERVATIONS:\n{}\nMEMORY_CONTEXT:\n{}",
            req.persona_display_name,
            req.room_id,
            policy_tags,
            Self::or_none(&req.persona_profile),
            req.content,
            Self::format_recent(&req.recent_messages),
            Self::or_none(&req.observation_summary),
            Self::or_none(&req.observation_context),
            Self::or_none(&req.memory_context),
        );
        Ok((system, user))
    }

    pub fn render_persona_auto_commentary(
        &self,
        req: &LlmRequest,
        prompt_id: Option<&str>,
    ) -> Result<(String, String), ManifestError> {
        let system = self
            .resolve(PURPOSE_AUTO_COMMENTARY, prompt_id)?
            .to_string();
        let user = format!(
            "persona: {}\nroom: {}\nPERSONA_PROFILE:\n{}\nOBSERVATION_SUMMARY:\n{}\nSTREAM_OBSERVATIONS:\n{}\nRECENT_CHAT:\n{}",
            req.persona_display_name,
            req.room_id,
            Self::or_none(&req.persona_profile),
            Self::or_none(&req.observation_summary),
            Self::or_none(&req.observation_context),
            Self::format_recent(&req.recent_messages),
        );
        Ok((system, user))
    }

    pub fn render_memory_extract(
        &self,
        req: &LlmRequest,
    ) -> Result<(String, String), ManifestError> {
        let system = self.resolve(PURPOSE_MEMORY_EXTRACT, None)?.to_string();
        let payload = serde_json::json!({
            "room_id": req.room_id,
            "persona_id": req.persona_id,
            "persona_name": req.persona_display_name,
            "message": req.content,
            "recent_messages": req.recent_messages,
        });
        let user = format!(
            "MEMORY EXTRACTION REQUEST\nRECENT_CHAT:\n{}\nTRIGGER_MESSAGE:\n{}\nPAYLOAD_JSON:\n{}",
            Self::format_recent(&req.recent_messages),
            req.content,
            payload,
        );
        Ok((system, user))
    }

    /// User prompt for the perceiver: the canonical JSON of the request
    /// payload. serde_json's default map ordering keeps object keys sorted,
    /// which is the canonical form.
    pub fn render_stream_observation(
        &self,
        payload: &serde_json::Value,
    ) -> Result<(String, String), ManifestError> {
        let system = self.resolve(PURPOSE_STREAM_OBSERVATION, None)?.to_string();
        let user = format!("STREAM OBSERVATION REQUEST\nPAYLOAD_JSON:\n{payload}");
        Ok((system, user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::canonical_prompt_sha256;

    fn renderer_with(purposes: &[(&str, &str, &str)]) -> (tempfile::TempDir, PromptRenderer) {
        let dir = tempfile::tempdir().unwrap();
        let mut prompts = Vec::new();
        for (id, purpose, text) in purposes {
            let file = format!("{id}.txt");
            std::fs::write(dir.path().join(&file), text).unwrap();
            prompts.push(serde_json::json!({
                "id": id,
                "purpose": purpose,
                "path": file,
                "sha256": canonical_prompt_sha256(text),
            }));
        }
        let manifest_path = dir.path().join("manifest.json");
        std::fs::write(
            &manifest_path,
            serde_json::json!({ "prompts": prompts }).to_string(),
        )
        .unwrap();
        let renderer = PromptRenderer::load(&manifest_path, dir.path()).unwrap();
        (dir, renderer)
    }

    #[test]
    fn persona_reply_layout() {
        let (_dir, renderer) =
            renderer_with(&[("persona_chat_reply_v2", "persona_reply", "you are a chatter")]);
        let req = LlmRequest {
            persona_display_name: "ClipGoblin".into(),
            room_id: "room:demo".into(),
            content: "big play!".into(),
            recent_messages: vec!["first".into(), "second".into()],
            tags: serde_json::json!({"p_used": 0.5}),
            ..Default::default()
        };
        let (system, user) = renderer.render_persona_reply(&req, None).unwrap();
        assert_eq!(system, "you are a chatter\n");
        assert!(user.starts_with("persona: ClipGoblin\nroom: room:demo\n"));
        assert!(user.contains("TRIGGER_MESSAGE:\nbig play!"));
        assert!(user.contains("RECENT_CHAT:\n- first\n- second"));
        assert!(user.contains("MEMORY_CONTEXT:\nNone"));
    }

    #[test]
    fn recent_chat_keeps_last_five() {
        let (_dir, renderer) =
            renderer_with(&[("auto_v1", "persona_auto_commentary", "commentate")]);
        let req = LlmRequest {
            recent_messages: (0..8).map(|i| format!("msg{i}")).collect(),
            ..Default::default()
        };
        let (_, user) = renderer.render_persona_auto_commentary(&req, None).unwrap();
        assert!(!user.contains("- msg2"));
        assert!(user.contains("- msg3"));
        assert!(user.contains("- msg7"));
    }

    #[test]
    fn unknown_prompt_id_is_an_error() {
        let (_dir, renderer) = renderer_with(&[("p", "persona_reply", "x")]);
        let req = LlmRequest::default();
        assert!(renderer.render_persona_reply(&req, Some("nope")).is_err());
    }

    #[test]
    fn stream_observation_prompt_embeds_payload() {
        let (_dir, renderer) =
            renderer_with(&[("stream_observation_v1", "stream_observation", "observe")]);
        let payload = serde_json::json!({"b": 1, "a": 2});
        let (_, user) = renderer.render_stream_observation(&payload).unwrap();
        // canonical form: sorted keys
        assert!(user.ends_with("PAYLOAD_JSON:\n{\"a\":2,\"b\":1}"));
    }
}
