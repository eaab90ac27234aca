//! Local indexed store.
//!
//! Rows live in SQLite keyed by scope; relevance is computed in process so
//! the ordering contract is exact: per normalized query token, a substring
//! hit scores subject 3, value 2, category 1. Results order by score desc,
//! then timestamp desc, then id. Zero-score rows never surface.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{debug, info};

use crate::db::init_db;
use crate::error::MemoryError;
use crate::store::{MemoryStore, StoreInfo};
use crate::types::{MemoryItem, MemoryQueryResult};

pub struct LocalMemoryStore {
    db: Mutex<Connection>,
}

impl LocalMemoryStore {
    pub fn open(path: &Path) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Seed the store from a fixtures file: `{"personas": {"<id>": [item…]}}`.
    pub fn load_fixtures(&self, path: &Path) -> Result<usize, MemoryError> {
        #[derive(Deserialize)]
        struct Fixtures {
            #[serde(default)]
            personas: std::collections::BTreeMap<String, Vec<MemoryItem>>,
        }

        let raw = std::fs::read_to_string(path)?;
        let fixtures: Fixtures = serde_json::from_str(&raw)?;
        let mut loaded = 0;
        for items in fixtures.personas.values() {
            for item in items {
                item.validate()?;
                self.insert(item)?;
                loaded += 1;
            }
        }
        info!(path = %path.display(), loaded, "loaded memory fixtures");
        Ok(loaded)
    }

    fn insert(&self, item: &MemoryItem) -> Result<(), MemoryError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO memory_items
             (id, ts, scope, scope_key, category, subject, value, confidence, ttl_days, source, redactions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                item.id,
                item.ts,
                item.scope.as_str(),
                item.scope_key,
                item.category,
                item.subject,
                item.value,
                item.confidence,
                item.ttl_days,
                serde_json::to_string(&item.source)?,
                serde_json::to_string(&item.redactions)?,
            ],
        )?;
        Ok(())
    }

    fn rows_for_scope(&self, scope_key: &str) -> Result<Vec<MemoryItem>, MemoryError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, ts, scope, scope_key, category, subject, value,
                    confidence, ttl_days, source, redactions
             FROM memory_items WHERE scope_key = ?1",
        )?;
        let rows = stmt.query_map([scope_key], row_to_item)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count(&self) -> Result<usize, MemoryError> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row("SELECT COUNT(*) FROM memory_items", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryItem> {
    let scope_str: String = row.get(2)?;
    let source_json: String = row.get(9)?;
    let redactions_json: String = row.get(10)?;
    Ok(MemoryItem {
        schema_name: None,
        schema_version: None,
        id: row.get(0)?,
        ts: row.get(1)?,
        scope: serde_json::from_value(serde_json::Value::String(scope_str))
            .unwrap_or(crate::types::MemoryScope::PersonaRoom),
        scope_key: row.get(3)?,
        category: row.get(4)?,
        subject: row.get(5)?,
        value: row.get(6)?,
        confidence: row.get(7)?,
        ttl_days: row.get(8)?,
        source: serde_json::from_str(&source_json).unwrap_or_default(),
        redactions: serde_json::from_str(&redactions_json).unwrap_or_default(),
    })
}

fn query_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn score_item(item: &MemoryItem, tokens: &[String]) -> u32 {
    let subject = item.subject.to_lowercase();
    let value = item.value.to_lowercase();
    let category = item.category.to_lowercase();
    let mut score = 0;
    for tok in tokens {
        if subject.contains(tok.as_str()) {
            score += 3;
        }
        if value.contains(tok.as_str()) {
            score += 2;
        }
        if category.contains(tok.as_str()) {
            score += 1;
        }
    }
    score
}

#[async_trait]
impl MemoryStore for LocalMemoryStore {
    async fn search(
        &self,
        scope_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<MemoryQueryResult, MemoryError> {
        let tokens = query_tokens(query);
        let mut scored: Vec<(u32, i64, MemoryItem)> = self
            .rows_for_scope(scope_key)?
            .into_iter()
            .filter_map(|item| {
                let score = score_item(&item, &tokens);
                if score > 0 {
                    Some((score, item.ts_ms(), item))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(a.2.id.cmp(&b.2.id))
        });

        let matched = scored.len();
        let items: Vec<MemoryItem> = scored.into_iter().take(limit).map(|e| e.2).collect();
        debug!(scope_key, query, matched, returned = items.len(), "local memory search");
        Ok(MemoryQueryResult { items, matched })
    }

    async fn upsert(&self, scope_key: &str, item: &MemoryItem) -> Result<(), MemoryError> {
        if item.scope_key != scope_key {
            return Err(MemoryError::ScopeMismatch {
                item: item.scope_key.clone(),
                call: scope_key.to_string(),
            });
        }
        item.validate()?;
        self.insert(item)
    }

    fn describe(&self) -> StoreInfo {
        StoreInfo {
            backend: "local".to_string(),
            detail: Some("sqlite".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryScope, MemorySource};

    fn item(id: &str, subject: &str, value: &str, category: &str, ts: &str) -> MemoryItem {
        MemoryItem {
            schema_name: None,
            schema_version: None,
            id: id.into(),
            ts: ts.into(),
            scope: MemoryScope::PersonaRoom,
            scope_key: "room:demo:clipgoblin".into(),
            category: category.into(),
            subject: subject.into(),
            value: value.into(),
            confidence: 0.9,
            ttl_days: 14,
            source: MemorySource {
                kind: "chat_message".into(),
                ..Default::default()
            },
            redactions: vec![],
        }
    }

    #[tokio::test]
    async fn search_scores_subject_over_value_over_category() {
        let store = LocalMemoryStore::open_in_memory().unwrap();
        let scope = "room:demo:clipgoblin";
        store
            .upsert(scope, &item("a", "speedrun pace", "x", "general", "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        store
            .upsert(scope, &item("b", "x", "loves speedrun talk", "general", "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        store
            .upsert(scope, &item("c", "x", "y", "speedrun", "2024-05-01T10:00:00Z"))
            .await
            .unwrap();

        let res = store.search(scope, "speedrun", 10).await.unwrap();
        assert_eq!(res.matched, 3);
        let ids: Vec<&str> = res.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn ties_break_by_recency_then_id() {
        let store = LocalMemoryStore::open_in_memory().unwrap();
        let scope = "room:demo:clipgoblin";
        store
            .upsert(scope, &item("b", "pb", "x", "g", "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        store
            .upsert(scope, &item("a", "pb", "x", "g", "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        store
            .upsert(scope, &item("z", "pb", "x", "g", "2024-05-02T10:00:00Z"))
            .await
            .unwrap();

        let res = store.search(scope, "pb", 10).await.unwrap();
        let ids: Vec<&str> = res.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
    }

    #[tokio::test]
    async fn zero_score_rows_and_foreign_scopes_stay_hidden() {
        let store = LocalMemoryStore::open_in_memory().unwrap();
        let scope = "room:demo:clipgoblin";
        store
            .upsert(scope, &item("a", "snack", "likes tacos", "food", "2024-05-01T10:00:00Z"))
            .await
            .unwrap();

        assert!(store.search(scope, "speedrun", 10).await.unwrap().items.is_empty());
        assert!(store
            .search("room:other:persona", "tacos", 10)
            .await
            .unwrap()
            .items
            .is_empty());
    }

    #[tokio::test]
    async fn upsert_rejects_scope_mismatch_and_replaces_by_id() {
        let store = LocalMemoryStore::open_in_memory().unwrap();
        let scope = "room:demo:clipgoblin";
        let first = item("a", "name", "Captain", "room_lore", "2024-05-01T10:00:00Z");
        store.upsert(scope, &first).await.unwrap();

        let err = store.upsert("room:wrong:scope", &first).await;
        assert!(matches!(err, Err(MemoryError::ScopeMismatch { .. })));

        let updated = item("a", "name", "Admiral", "room_lore", "2024-05-02T10:00:00Z");
        store.upsert(scope, &updated).await.unwrap();
        assert_eq!(store.count().unwrap(), 1);
        let res = store.search(scope, "name", 10).await.unwrap();
        assert_eq!(res.items[0].value, "Admiral");
    }
}
