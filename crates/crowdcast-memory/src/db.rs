use rusqlite::{Connection, Result};

/// Initialise the memory table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_items (
            id          TEXT PRIMARY KEY,
            ts          TEXT NOT NULL,
            scope       TEXT NOT NULL,
            scope_key   TEXT NOT NULL,
            category    TEXT NOT NULL,
            subject     TEXT NOT NULL,
            value       TEXT NOT NULL,
            confidence  REAL NOT NULL DEFAULT 0.5,
            ttl_days    INTEGER NOT NULL DEFAULT 30,
            source      TEXT NOT NULL,
            redactions  TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_memory_scope_key
            ON memory_items(scope_key);",
    )
}
