// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Connection ownership, schema creation and forward migrations.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::debug;

use crate::MemoryError;

/// The single shared database connection.  Writers serialize on the mutex.
pub type SharedConn = Arc<Mutex<Connection>>;

/// Lock the connection, recovering from a poisoned mutex (a panicked
/// writer leaves the database itself consistent — SQLite transactions are
/// atomic).
pub(crate) fn lock(conn: &SharedConn) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS profile_facts (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS project_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS episodic_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    tool_name TEXT,
    decision TEXT,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS memory_embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_kind TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    source_ref TEXT,
    chunk_index INTEGER NOT NULL DEFAULT 0,
    text_chunk TEXT NOT NULL,
    embedding_json TEXT NOT NULL,
    embedding_model TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_memory_embeddings_source
ON memory_embeddings(source_kind, source_id);

CREATE TABLE IF NOT EXISTS api_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_name TEXT NOT NULL,
    caller TEXT NOT NULL,
    model TEXT NOT NULL,
    prompt_tokens INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_api_usage_profile_created
ON api_usage(profile_name, created_at DESC);

CREATE TABLE IF NOT EXISTS approval_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_name TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    tier TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    reviewed_at TEXT
);

CREATE TABLE IF NOT EXISTS interop_nonces (
    nonce TEXT PRIMARY KEY,
    source_node TEXT NOT NULL,
    target_node TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS interop_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    direction TEXT NOT NULL,
    source_node TEXT NOT NULL,
    target_node TEXT NOT NULL,
    task_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    nonce TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
";

/// Columns added after the first release.  Each statement is safe to run
/// against a database that already has the column.
const MIGRATIONS: &[&str] = &[
    "ALTER TABLE approval_queue ADD COLUMN execution_status TEXT NOT NULL DEFAULT 'not_executed'",
    "ALTER TABLE approval_queue ADD COLUMN executed_at TEXT",
    "ALTER TABLE approval_queue ADD COLUMN execution_result TEXT",
];

/// Owns the database file, creates the schema, and hands out the shared
/// connection.
pub struct MemoryStore {
    db_path: PathBuf,
    conn: SharedConn,
}

impl MemoryStore {
    /// Open (creating parent directories and the schema as needed).
    pub fn open(db_path: &Path) -> Result<Self, MemoryError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let store = Self {
            db_path: db_path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    /// An in-memory store for tests.
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        let store = Self {
            db_path: PathBuf::from(":memory:"),
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), MemoryError> {
        let conn = lock(&self.conn);
        conn.execute_batch(SCHEMA)?;
        for stmt in MIGRATIONS {
            if let Err(e) = conn.execute(stmt, []) {
                let msg = e.to_string();
                if msg.contains("duplicate column name") {
                    continue;
                }
                return Err(e.into());
            }
            debug!(statement = %stmt, "applied schema migration");
        }
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Clone the shared connection handle for a store constructor.
    pub fn conn(&self) -> SharedConn {
        Arc::clone(&self.conn)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("nested/dir/memory.db");
        let store = MemoryStore::open(&db).unwrap();
        assert!(db.exists());
        assert_eq!(store.db_path(), db);
    }

    #[test]
    fn schema_is_idempotent_across_reopens() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("memory.db");
        drop(MemoryStore::open(&db).unwrap());
        // Second open replays schema + migrations against existing tables.
        drop(MemoryStore::open(&db).unwrap());
    }

    #[test]
    fn migrations_add_execution_columns() {
        let store = MemoryStore::open_in_memory().unwrap();
        let conn = store.conn();
        let guard = lock(&conn);
        let mut stmt = guard
            .prepare("SELECT execution_status, executed_at, execution_result FROM approval_queue")
            .unwrap();
        // The statement prepared, so the columns exist.
        assert_eq!(stmt.column_count(), 3);
    }
}
