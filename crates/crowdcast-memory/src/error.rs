use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid scope key '{scope_key}': {reason}")]
    InvalidScopeKey { scope_key: String, reason: String },

    #[error("scope key mismatch: item carries '{item}', call used '{call}'")]
    ScopeMismatch { item: String, call: String },

    #[error("invalid memory item: {0}")]
    InvalidItem(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
