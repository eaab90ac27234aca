use async_trait::async_trait;

use crate::error::MemoryError;
use crate::types::{MemoryItem, MemoryQueryResult};

/// Small record for the stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreInfo {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Capability shared by the local and remote stores.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn search(
        &self,
        scope_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<MemoryQueryResult, MemoryError>;

    async fn upsert(&self, scope_key: &str, item: &MemoryItem) -> Result<(), MemoryError>;

    fn describe(&self) -> StoreInfo;
}
