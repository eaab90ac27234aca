//! LLM provider capability.
//!
//! Two interchangeable providers sit behind [`provider::LlmProvider`]: a
//! deterministic fixture-backed stub and an OpenAI-compatible HTTP client.
//! Prompts are loaded through a manifest whose canonical SHA-256 digests are
//! verified at startup, so a service never runs against silently edited
//! prompt files.

pub mod config;
pub mod http;
pub mod manifest;
pub mod provider;
pub mod renderer;
pub mod stub;
pub mod text;
pub mod types;

pub use config::{build_provider, load_provider_config, ProviderConfig};
pub use manifest::{canonical_prompt_sha256, canonical_prompt_text, ManifestError};
pub use provider::{LlmProvider, ProviderError, ProviderInfo};
pub use renderer::PromptRenderer;
pub use types::{LlmRequest, LlmResponse};
