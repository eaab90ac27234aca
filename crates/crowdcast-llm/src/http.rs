//! OpenAI-compatible chat-completions provider.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::HttpProviderConfig;
use crate::provider::{LlmProvider, ProviderError, ProviderInfo};
use crate::text::clean_text;
use crate::types::{LlmRequest, LlmResponse};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub struct HttpProvider {
    client: reqwest::Client,
    model: String,
    api_base: String,
    api_key: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    max_output_chars: usize,
}

impl HttpProvider {
    pub fn new(cfg: &HttpProviderConfig, max_output_chars: usize) -> Result<Self, ProviderError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = cfg.timeout_s {
            builder = builder.timeout(std::time::Duration::from_secs(secs));
        }
        let client = builder.build()?;

        // the key is named by env var so provider configs stay secret-free
        let api_key = cfg
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok());

        Ok(Self {
            client,
            model: cfg.model.clone(),
            api_base: cfg
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            max_output_chars,
        })
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(&self, req: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": req.system_prompt},
                {"role": "user", "content": if req.user_prompt.is_empty() { &req.content } else { &req.user_prompt }},
            ],
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(m) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(m);
        }

        let url = format!("{}/chat/completions", self.api_base);
        debug!(model = %self.model, "sending chat completion request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat completion API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let raw = api
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(LlmResponse {
            text: clean_text(&raw, self.max_output_chars),
            provider: "http".to_string(),
            model: Some(self.model.clone()),
        })
    }

    fn describe(&self) -> ProviderInfo {
        ProviderInfo {
            provider: "http".to_string(),
            model: Some(self.model.clone()),
            max_output_chars: self.max_output_chars,
        }
    }
}
