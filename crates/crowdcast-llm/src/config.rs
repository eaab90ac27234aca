//! Provider configuration files.
//!
//! A provider config is a small JSON document selecting `stub` or `http` and
//! carrying that backend's knobs. Unknown keys are ignored for forward
//! compatibility.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::provider::{LlmProvider, ProviderError};
use crate::stub::{KeyStrategy, StubProvider};

pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Stub,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StubProviderConfig {
    pub fixtures_path: String,
    #[serde(default = "default_response")]
    pub default_response: String,
    #[serde(default)]
    pub key_strategy: KeyStrategy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpProviderConfig {
    pub model: String,
    pub api_base: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub timeout_s: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    pub stub: Option<StubProviderConfig>,
    pub http: Option<HttpProviderConfig>,
}

fn default_response() -> String {
    "ok".to_string()
}

fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}

pub fn load_provider_config(path: &Path) -> Result<ProviderConfig, ProviderError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ProviderError::Fixture(format!("cannot read provider config {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| ProviderError::Fixture(format!("provider config parse error: {e}")))
}

/// Build the configured provider. Relative paths inside the config resolve
/// against `base_dir`.
pub fn build_provider(
    cfg: &ProviderConfig,
    base_dir: &Path,
) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    match cfg.provider {
        ProviderKind::Stub => {
            let stub_cfg = cfg.stub.as_ref().ok_or_else(|| {
                ProviderError::Fixture("provider=stub but no [stub] block".to_string())
            })?;
            let fixtures = base_dir.join(&stub_cfg.fixtures_path);
            Ok(Arc::new(StubProvider::load(
                &fixtures,
                stub_cfg.default_response.clone(),
                stub_cfg.key_strategy,
                cfg.max_output_chars,
            )?))
        }
        ProviderKind::Http => {
            let http_cfg = cfg.http.as_ref().ok_or_else(|| {
                ProviderError::Fixture("provider=http but no [http] block".to_string())
            })?;
            Ok(Arc::new(crate::http::HttpProvider::new(
                http_cfg,
                cfg.max_output_chars,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stub_config() {
        let json = r#"{
            "provider": "stub",
            "max_output_chars": 180,
            "stub": {"fixtures_path": "data/fixtures.json", "key_strategy": "marker_only"}
        }"#;
        let cfg: ProviderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.provider, ProviderKind::Stub);
        assert_eq!(cfg.max_output_chars, 180);
        assert_eq!(
            cfg.stub.unwrap().key_strategy,
            crate::stub::KeyStrategy::MarkerOnly
        );
    }

    #[test]
    fn rejects_unknown_provider_kind() {
        let json = r#"{"provider": "quantum"}"#;
        assert!(serde_json::from_str::<ProviderConfig>(json).is_err());
    }

    #[test]
    fn http_config_defaults() {
        let json = r#"{"provider": "http", "http": {"model": "gpt-4o-mini"}}"#;
        let cfg: ProviderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.max_output_chars, DEFAULT_MAX_OUTPUT_CHARS);
        assert!(cfg.http.unwrap().api_base.is_none());
    }
}
