// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Interop persistence: the nonce ledger and the message log.
//!
//! The nonce table has a single job — each nonce inserts at most once
//! (primary-key enforced), which is the whole replay defense.  The
//! message log is the append-only inbox/outbox/relay record; rows are
//! never mutated after insert.
//!
//! [`InteropLog::accept_inbound`] performs the receive-path write: nonce
//! insert and inbox row in one transaction, so a replayed envelope leaves
//! no message record behind.

use serde::Serialize;
use serde_json::Value;

use crate::store::{lock, SharedConn};
use crate::MemoryError;

/// Which way a message moved through this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbox,
    Outbox,
    Relay,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbox => "inbox",
            Direction::Outbox => "outbox",
            Direction::Relay => "relay",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub direction: String,
    pub source: String,
    pub target: String,
    pub task_type: String,
    pub payload: Value,
    pub nonce: String,
    pub status: String,
    pub created_at: String,
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[derive(Clone)]
pub struct InteropLog {
    conn: SharedConn,
}

impl InteropLog {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Has this nonce been seen before?
    pub fn nonce_seen(&self, nonce: &str) -> Result<bool, MemoryError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare("SELECT 1 FROM interop_nonces WHERE nonce = ?1")?;
        Ok(stmt.exists([nonce])?)
    }

    /// Append one message record; returns its id.
    pub fn append(
        &self,
        direction: Direction,
        source: &str,
        target: &str,
        task_type: &str,
        payload: &Value,
        nonce: &str,
        status: &str,
    ) -> Result<i64, MemoryError> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO interop_messages
                 (direction, source_node, target_node, task_type, payload, nonce, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                direction.as_str(),
                source,
                target,
                task_type,
                payload.to_string(),
                nonce,
                status
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Receive-path write: burn the nonce and append the inbox row in one
    /// transaction.  A duplicate nonce aborts with
    /// [`MemoryError::DuplicateNonce`] and writes nothing.
    pub fn accept_inbound(
        &self,
        nonce: &str,
        source: &str,
        target: &str,
        task_type: &str,
        payload: &Value,
    ) -> Result<i64, MemoryError> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("SELECT 1 FROM interop_nonces WHERE nonce = ?1")?;
            if stmt.exists([nonce])? {
                return Err(MemoryError::DuplicateNonce);
            }
        }
        tx.execute(
            "INSERT INTO interop_nonces (nonce, source_node, target_node) VALUES (?1, ?2, ?3)",
            rusqlite::params![nonce, source, target],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                MemoryError::DuplicateNonce
            } else {
                e.into()
            }
        })?;
        tx.execute(
            "INSERT INTO interop_messages
                 (direction, source_node, target_node, task_type, payload, nonce, status)
             VALUES ('inbox', ?1, ?2, ?3, ?4, ?5, 'received')",
            rusqlite::params![source, target, task_type, payload.to_string(), nonce],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Most recent messages, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<MessageRecord>, MemoryError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT id, direction, source_node, target_node, task_type, payload, nonce,
                    status, created_at
             FROM interop_messages
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, direction, source, target, task_type, payload, nonce, status, created_at) =
                row?;
            out.push(MessageRecord {
                id,
                direction,
                source,
                target,
                task_type,
                payload: serde_json::from_str(&payload)?,
                nonce,
                status,
                created_at,
            });
        }
        Ok(out)
    }

    /// Epoch seconds of the newest successfully-sent outbox row for
    /// `(target, task_type)` — direct (`sent`) or hub-routed
    /// (`sent:routed:<hub>`) both count.
    pub fn last_sent_timestamp(
        &self,
        target: &str,
        task_type: &str,
    ) -> Result<Option<i64>, MemoryError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT CAST(strftime('%s', created_at) AS INTEGER)
             FROM interop_messages
             WHERE direction = 'outbox' AND target_node = ?1 AND task_type = ?2
               AND status LIKE 'sent%'
             ORDER BY id DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query(rusqlite::params![target, task_type])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
