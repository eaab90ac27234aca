//! Prompt manifest loading and canonical hashing.
//!
//! A prompt file's identity is the SHA-256 of its canonical text: CR/LF
//! normalized to LF with exactly one trailing newline. The digest is stable
//! across OS newline conventions, so a manifest produced on one platform
//! verifies on any other. A digest mismatch at startup is fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("manifest parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("prompt file missing: {0}")]
    MissingFile(PathBuf),

    #[error("prompt digest mismatch for {path}: expected {expected}, got {actual}")]
    ShaMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("no prompt found for {0}")]
    UnknownPrompt(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptEntry {
    pub id: String,
    /// e.g. "persona_reply", "persona_auto_commentary", "memory_extract",
    /// "stream_observation".
    pub purpose: String,
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptManifest {
    pub prompts: Vec<PromptEntry>,
}

/// Normalize raw prompt text: CR/LF -> LF, exactly one trailing LF.
pub fn canonical_prompt_text(raw: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = normalized.trim_end_matches('\n').to_string();
    out.push('\n');
    out
}

/// SHA-256 hex digest of the canonical form of `raw`.
pub fn canonical_prompt_sha256(raw: &str) -> String {
    let canonical = canonical_prompt_text(raw);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn read_file(path: &Path) -> Result<String, ManifestError> {
    std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the manifest, confirm every prompt file exists, and verify each
/// canonical digest. Returns the manifest plus the canonical text per id.
pub fn load_verified(
    manifest_path: &Path,
    base_dir: &Path,
) -> Result<(PromptManifest, HashMap<String, String>), ManifestError> {
    let manifest: PromptManifest = serde_json::from_str(&read_file(manifest_path)?)?;

    let mut texts = HashMap::new();
    for entry in &manifest.prompts {
        let prompt_path = base_dir.join(&entry.path);
        if !prompt_path.exists() {
            return Err(ManifestError::MissingFile(prompt_path));
        }
        let raw = read_file(&prompt_path)?;
        let actual = canonical_prompt_sha256(&raw);
        if actual != entry.sha256 {
            return Err(ManifestError::ShaMismatch {
                path: prompt_path,
                expected: entry.sha256.clone(),
                actual,
            });
        }
        texts.insert(entry.id.clone(), canonical_prompt_text(&raw));
    }
    Ok((manifest, texts))
}
