// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Episodic log — the append-only record of everything the node decided.
//!
//! Every policy denial, approval, tool run, interop accept/reject and
//! scheduler outcome lands here with a `decision` of `allow`,
//! `require_approval` or `deny`.  Rows are never mutated.

use serde::Serialize;
use serde_json::Value;

use crate::store::{lock, SharedConn};
use crate::MemoryError;

#[derive(Debug, Clone, Serialize)]
pub struct EpisodicEvent {
    pub id: i64,
    pub event_type: String,
    pub tool_name: Option<String>,
    pub decision: Option<String>,
    pub payload: Value,
    pub created_at: String,
}

#[derive(Clone)]
pub struct EpisodicLog {
    conn: SharedConn,
}

impl EpisodicLog {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Append one event; returns its row id.
    pub fn record(
        &self,
        event_type: &str,
        payload: &Value,
        tool_name: Option<&str>,
        decision: Option<&str>,
    ) -> Result<i64, MemoryError> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO episodic_log (event_type, tool_name, decision, payload)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![event_type, tool_name, decision, payload.to_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent events, newest first.
    pub fn latest(&self, limit: u32) -> Result<Vec<EpisodicEvent>, MemoryError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT id, event_type, tool_name, decision, payload, created_at
             FROM episodic_log
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (id, event_type, tool_name, decision, payload, created_at) = row?;
            events.push(EpisodicEvent {
                id,
                event_type,
                tool_name,
                decision,
                payload: serde_json::from_str(&payload)?,
                created_at,
            });
        }
        Ok(events)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
