use async_trait::async_trait;

use crate::types::{LlmRequest, LlmResponse};

/// Small record for the stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderInfo {
    pub provider: String,
    pub model: Option<String>,
    pub max_output_chars: usize,
}

/// Common interface for reply-producing backends (stub, HTTP).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and trace fields.
    fn name(&self) -> &str;

    async fn generate(&self, req: &LlmRequest) -> Result<LlmResponse, ProviderError>;

    fn describe(&self) -> ProviderInfo;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Fixture error: {0}")]
    Fixture(String),
}
