// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Durable approval queue for tier-gated tool calls.
//!
//! Two independent lifecycles per record:
//!
//! - `status`: `pending` → `approved` | `rejected`, exactly once
//!   ([`ApprovalQueue::resolve`] on a non-pending row is a no-op that
//!   returns `false`);
//! - `execution_status`: `not_executed` → `executed`, only while
//!   `status = approved` ([`ApprovalQueue::mark_executed`]).
//!
//! Both guards are enforced in the UPDATE's WHERE clause so concurrent
//! reviewers cannot double-resolve or double-execute.

use serde::Serialize;
use serde_json::Value;

use crate::store::{lock, SharedConn};
use crate::MemoryError;

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRecord {
    pub id: i64,
    pub profile_name: String,
    pub tool_name: String,
    pub tier: String,
    pub payload: Value,
    pub status: String,
    pub created_at: String,
    pub reviewed_at: Option<String>,
    pub execution_status: String,
    pub executed_at: Option<String>,
    pub execution_result: Option<Value>,
}

const RECORD_COLUMNS: &str = "id, profile_name, tool_name, tier, payload, status, created_at, \
                              reviewed_at, execution_status, executed_at, execution_result";

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ApprovalRecord, Option<String>)> {
    let payload: String = row.get(4)?;
    let execution_result: Option<String> = row.get(10)?;
    Ok((
        ApprovalRecord {
            id: row.get(0)?,
            profile_name: row.get(1)?,
            tool_name: row.get(2)?,
            tier: row.get(3)?,
            payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
            status: row.get(5)?,
            created_at: row.get(6)?,
            reviewed_at: row.get(7)?,
            execution_status: row.get(8)?,
            executed_at: row.get(9)?,
            execution_result: None,
        },
        execution_result,
    ))
}

fn finish_record(pair: (ApprovalRecord, Option<String>)) -> Result<ApprovalRecord, MemoryError> {
    let (mut record, raw_result) = pair;
    if let Some(raw) = raw_result {
        record.execution_result = Some(serde_json::from_str(&raw)?);
    }
    Ok(record)
}

#[derive(Clone)]
pub struct ApprovalQueue {
    conn: SharedConn,
}

impl ApprovalQueue {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Queue a tool call for review; returns the approval id.
    pub fn enqueue(
        &self,
        profile_name: &str,
        tool_name: &str,
        tier: &str,
        payload: &Value,
    ) -> Result<i64, MemoryError> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO approval_queue (profile_name, tool_name, tier, payload)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![profile_name, tool_name, tier, payload.to_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<Option<ApprovalRecord>, MemoryError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_queue WHERE id = ?1"
        ))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(finish_record(record_from_row(row)?)?)),
            None => Ok(None),
        }
    }

    pub fn list_pending(&self, limit: u32) -> Result<Vec<ApprovalRecord>, MemoryError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_queue
             WHERE status = 'pending' ORDER BY id ASC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], record_from_row)?;
        rows.map(|r| finish_record(r?)).collect()
    }

    pub fn list_recent(&self, limit: u32) -> Result<Vec<ApprovalRecord>, MemoryError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_queue ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], record_from_row)?;
        rows.map(|r| finish_record(r?)).collect()
    }

    /// Transition pending → approved/rejected, stamping `reviewed_at`.
    /// Returns false when the record is missing or already resolved.
    pub fn resolve(&self, id: i64, approve: bool) -> Result<bool, MemoryError> {
        let status = if approve { "approved" } else { "rejected" };
        let conn = lock(&self.conn);
        let changed = conn.execute(
            "UPDATE approval_queue
             SET status = ?1, reviewed_at = CURRENT_TIMESTAMP
             WHERE id = ?2 AND status = 'pending'",
            rusqlite::params![status, id],
        )?;
        Ok(changed > 0)
    }

    /// Record the one-and-only execution of an approved action.  Returns
    /// false unless `status = approved` and it has not executed yet.
    pub fn mark_executed(&self, id: i64, result: &Value) -> Result<bool, MemoryError> {
        let conn = lock(&self.conn);
        let changed = conn.execute(
            "UPDATE approval_queue
             SET execution_status = 'executed',
                 executed_at = CURRENT_TIMESTAMP,
                 execution_result = ?1
             WHERE id = ?2 AND status = 'approved' AND execution_status != 'executed'",
            rusqlite::params![result.to_string(), id],
        )?;
        Ok(changed > 0)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
