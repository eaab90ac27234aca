//! Remote HTTP memory store.
//!
//! The service addresses memories by identifier set (app/user/agent/run), not
//! by scope key, so the scope key is lifted into identifiers before any call.
//! A scope key that yields no identifier is rejected without touching the
//! network.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::MemoryError;
use crate::store::{MemoryStore, StoreInfo};
use crate::types::{MemoryItem, MemoryQueryResult, MemoryScope, MemorySource};

/// Strip a trailing slash and a `/v1` or `/v2` suffix; endpoint paths carry
/// their own version. Both historical config forms normalize to the same URL.
pub fn normalize_base_url(base_url: &str) -> String {
    let mut trimmed = base_url.trim_end_matches('/');
    for suffix in ["/v1", "/v2"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            trimmed = stripped.trim_end_matches('/');
        }
    }
    if trimmed.is_empty() {
        base_url.trim_end_matches('/').to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScopeIdentifiers {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub run_id: Option<String>,
}

impl ScopeIdentifiers {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.agent_id.is_none() && self.run_id.is_none()
    }

    fn apply(&self, body: &mut Value) {
        if let Some(u) = &self.user_id {
            body["user_id"] = json!(u);
        }
        if let Some(a) = &self.agent_id {
            body["agent_id"] = json!(a);
        }
        if let Some(r) = &self.run_id {
            body["run_id"] = json!(r);
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Derive identifiers from a scope key.
///
/// Prefixed shapes: `persona:<id>`, `persona_room:<room…>:<persona>`,
/// `persona_user:<room…>:<persona>:<user>`. Legacy un-prefixed `room:` keys
/// are still accepted. Room ids may themselves contain colons, so the
/// room part is everything between prefix and the trailing components.
pub fn identifiers_from_scope_key(scope_key: &str) -> ScopeIdentifiers {
    let raw = scope_key.trim();
    if raw.is_empty() {
        return ScopeIdentifiers::default();
    }
    let parts: Vec<&str> = raw.split(':').collect();

    match parts[0] {
        "persona" if parts.len() >= 2 => {
            let persona = parts[1..].join(":");
            ScopeIdentifiers {
                agent_id: non_empty(&persona),
                ..Default::default()
            }
        }
        "persona_room" if parts.len() >= 3 => ScopeIdentifiers {
            agent_id: non_empty(parts[parts.len() - 1]),
            run_id: non_empty(&parts[1..parts.len() - 1].join(":")),
            ..Default::default()
        },
        "persona_user" if parts.len() >= 4 => ScopeIdentifiers {
            user_id: non_empty(parts[parts.len() - 1]),
            agent_id: non_empty(parts[parts.len() - 2]),
            run_id: non_empty(&parts[1..parts.len() - 2].join(":")),
        },
        // Legacy pre-prefixed shapes: `room:<name>:<persona>[:<user>]`.
        "room" if parts.len() >= 4 => ScopeIdentifiers {
            user_id: non_empty(parts[parts.len() - 1]),
            agent_id: non_empty(parts[parts.len() - 2]),
            run_id: non_empty(&parts[..parts.len() - 2].join(":")),
        },
        "room" if parts.len() == 3 => ScopeIdentifiers {
            agent_id: non_empty(parts[2]),
            run_id: non_empty(&parts[..2].join(":")),
            ..Default::default()
        },
        _ if parts.len() == 1 => ScopeIdentifiers {
            agent_id: non_empty(raw),
            ..Default::default()
        },
        _ => ScopeIdentifiers {
            user_id: non_empty(raw),
            ..Default::default()
        },
    }
}

pub struct RemoteMemoryStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    app_id: Option<String>,
    max_items: usize,
    max_chars: usize,
}

impl RemoteMemoryStore {
    pub fn new(
        api_key: String,
        base_url: &str,
        timeout_s: u64,
        app_id: Option<String>,
        max_items: usize,
        max_chars: usize,
    ) -> Result<Self, MemoryError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_s))
            .build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            api_key,
            app_id,
            max_items,
            max_chars,
        })
    }

    fn identifiers(&self, scope_key: &str) -> Result<ScopeIdentifiers, MemoryError> {
        let ids = identifiers_from_scope_key(scope_key);
        if ids.is_empty() && self.app_id.is_none() {
            return Err(MemoryError::InvalidScopeKey {
                scope_key: scope_key.to_string(),
                reason: "cannot derive any identifier".to_string(),
            });
        }
        Ok(ids)
    }

    fn enrich(&self, body: &mut Value) {
        if let Some(app) = &self.app_id {
            body["app_id"] = json!(app);
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, MemoryError> {
        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Token {}", self.api_key))
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(%status, body = %text, url, "remote memory store error");
            return Err(MemoryError::InvalidItem(format!(
                "remote store returned {status}: {text}"
            )));
        }
        Ok(resp.json().await.unwrap_or(Value::Null))
    }

    /// Map one search result onto a MemoryItem, preferring the metadata the
    /// store round-tripped and synthesizing the rest.
    fn build_item(&self, result: &Value, scope_key: &str, idx: usize) -> MemoryItem {
        let metadata = result.get("metadata").cloned().unwrap_or(Value::Null);
        let raw_value = metadata
            .get("value")
            .and_then(Value::as_str)
            .or_else(|| result.get("memory").and_then(Value::as_str))
            .or_else(|| result.get("content").and_then(Value::as_str))
            .unwrap_or_default();
        let value: String = raw_value.chars().take(self.max_chars).collect();

        let id = result
            .get("id")
            .or_else(|| result.get("memory_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                use sha2::Digest;
                let seed = format!("{scope_key}:{value}:{idx}");
                format!(
                    "remote:{}",
                    &hex::encode(sha2::Sha256::digest(seed.as_bytes()))[..16]
                )
            });

        let scope = match metadata.get("scope").and_then(Value::as_str) {
            Some("persona") => MemoryScope::Persona,
            Some("persona_user") => MemoryScope::PersonaUser,
            Some("persona_room") => MemoryScope::PersonaRoom,
            _ if scope_key.starts_with("persona_user") => MemoryScope::PersonaUser,
            _ if scope_key.starts_with("persona:") => MemoryScope::Persona,
            _ => MemoryScope::PersonaRoom,
        };

        MemoryItem {
            schema_name: None,
            schema_version: None,
            id,
            ts: metadata
                .get("ts")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    chrono::Utc::now()
                        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                }),
            scope,
            scope_key: metadata
                .get("scope_key")
                .and_then(Value::as_str)
                .unwrap_or(scope_key)
                .to_string(),
            category: metadata
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or("general")
                .to_string(),
            subject: metadata
                .get("subject")
                .and_then(Value::as_str)
                .unwrap_or("memory")
                .to_string(),
            value,
            confidence: metadata
                .get("confidence")
                .and_then(Value::as_f64)
                .or_else(|| result.get("score").and_then(Value::as_f64))
                .unwrap_or(0.5),
            ttl_days: metadata.get("ttl_days").and_then(Value::as_i64).unwrap_or(30),
            source: MemorySource {
                kind: "remote_search".to_string(),
                ..Default::default()
            },
            redactions: metadata
                .get("redactions")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl MemoryStore for RemoteMemoryStore {
    async fn search(
        &self,
        scope_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<MemoryQueryResult, MemoryError> {
        let ids = self.identifiers(scope_key)?;
        let mut body = json!({
            "query": query,
            "limit": limit.min(self.max_items),
        });
        ids.apply(&mut body);
        self.enrich(&mut body);

        let url = format!("{}/v2/memories/search", self.base_url);
        let response = self.post(&url, &body).await?;
        let results = response
            .get("results")
            .or_else(|| response.get("data"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let items: Vec<MemoryItem> = results
            .iter()
            .enumerate()
            .map(|(idx, r)| self.build_item(r, scope_key, idx))
            .take(self.max_items)
            .collect();
        debug!(scope_key, matched = results.len(), returned = items.len(), "remote memory search");
        Ok(MemoryQueryResult {
            matched: results.len(),
            items,
        })
    }

    async fn upsert(&self, scope_key: &str, item: &MemoryItem) -> Result<(), MemoryError> {
        if item.scope_key != scope_key {
            return Err(MemoryError::ScopeMismatch {
                item: item.scope_key.clone(),
                call: scope_key.to_string(),
            });
        }
        let ids = self.identifiers(scope_key)?;

        let mut metadata = json!({
            "scope": item.scope.as_str(),
            "scope_key": item.scope_key,
            "category": item.category,
            "subject": item.subject,
            "confidence": item.confidence,
            "ttl_days": item.ttl_days,
        });
        if !item.redactions.is_empty() {
            metadata["redactions"] = json!(item.redactions);
        }

        let mut body = json!({
            "messages": [{"role": "user", "content": item.value}],
            "infer": false,
            "async_mode": false,
            "metadata": metadata,
        });
        ids.apply(&mut body);
        self.enrich(&mut body);

        let url = format!("{}/v1/memories/", self.base_url);
        let response = self.post(&url, &body).await?;
        if let Some(created) = response
            .get("id")
            .or_else(|| response.get("memory_id"))
            .and_then(Value::as_str)
        {
            debug!(scope_key, created, "remote memory upsert");
        }
        Ok(())
    }

    fn describe(&self) -> StoreInfo {
        StoreInfo {
            backend: "remote".to_string(),
            detail: Some(self.base_url.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalization_accepts_both_historical_forms() {
        assert_eq!(normalize_base_url("https://m.example/v1"), "https://m.example");
        assert_eq!(normalize_base_url("https://m.example/v1/"), "https://m.example");
        assert_eq!(normalize_base_url("https://m.example/"), "https://m.example");
        assert_eq!(normalize_base_url("https://m.example"), "https://m.example");
        assert_eq!(normalize_base_url("https://m.example/v2"), "https://m.example");
    }

    #[test]
    fn persona_scope_maps_to_agent_id() {
        let ids = identifiers_from_scope_key("persona:clipgoblin");
        assert_eq!(ids.agent_id.as_deref(), Some("clipgoblin"));
        assert!(ids.user_id.is_none() && ids.run_id.is_none());
    }

    #[test]
    fn persona_room_scope_keeps_colons_in_room_id() {
        let ids = identifiers_from_scope_key("persona_room:room:demo:clipgoblin");
        assert_eq!(ids.agent_id.as_deref(), Some("clipgoblin"));
        assert_eq!(ids.run_id.as_deref(), Some("room:demo"));
    }

    #[test]
    fn persona_user_scope_derives_all_three() {
        let ids = identifiers_from_scope_key("persona_user:room:demo:clipgoblin:user9");
        assert_eq!(ids.user_id.as_deref(), Some("user9"));
        assert_eq!(ids.agent_id.as_deref(), Some("clipgoblin"));
        assert_eq!(ids.run_id.as_deref(), Some("room:demo"));
    }

    #[test]
    fn legacy_room_scope_still_derives() {
        let ids = identifiers_from_scope_key("room:demo:clipgoblin");
        assert_eq!(ids.agent_id.as_deref(), Some("clipgoblin"));
        assert_eq!(ids.run_id.as_deref(), Some("room:demo"));
    }

    #[tokio::test]
    async fn underivable_scope_key_is_rejected_before_any_network_call() {
        // Unroutable base URL: a network attempt would error differently.
        let store = RemoteMemoryStore::new(
            "key".into(),
            "http://127.0.0.1:1/v1",
            1,
            None,
            5,
            800,
        )
        .unwrap();
        let err = store.search("   ", "query", 5).await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidScopeKey { .. }));
    }
}
