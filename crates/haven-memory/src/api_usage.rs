// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! LLM token-usage ledger, summarized by the `/api-usage` endpoint.

use serde::Serialize;
use serde_json::{json, Value};

use crate::store::{lock, SharedConn};
use crate::MemoryError;

/// Aggregated usage over an optional trailing window.
#[derive(Debug, Serialize)]
pub struct UsageSummary {
    pub enabled: bool,
    pub total_calls: i64,
    pub total_prompt_tokens: i64,
    pub total_completion_tokens: i64,
    pub total_tokens: i64,
    pub window_days: Option<u32>,
    pub by_model: Vec<Value>,
    pub by_caller: Vec<Value>,
    pub recent_calls: Vec<Value>,
}

#[derive(Clone)]
pub struct ApiUsageLedger {
    conn: SharedConn,
}

impl ApiUsageLedger {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    pub fn record(
        &self,
        profile_name: &str,
        caller: &str,
        model: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
    ) -> Result<(), MemoryError> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO api_usage
                 (profile_name, caller, model, prompt_tokens, completion_tokens, total_tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                profile_name,
                caller,
                model,
                prompt_tokens,
                completion_tokens,
                prompt_tokens + completion_tokens
            ],
        )?;
        Ok(())
    }

    /// Totals plus per-model / per-caller breakdowns and the 25 most
    /// recent calls.  `window_days` (clamped to 1..=365) restricts the
    /// aggregates, not the recent list.
    pub fn summary(&self, window_days: Option<u32>) -> Result<UsageSummary, MemoryError> {
        let window = window_days.map(|d| d.clamp(1, 365));
        let (where_clause, cutoff) = match window {
            Some(days) => ("WHERE created_at >= datetime('now', ?1)", Some(format!("-{days} days"))),
            None => ("", None),
        };

        let conn = lock(&self.conn);

        let totals_sql = format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(prompt_tokens), 0),
                    COALESCE(SUM(completion_tokens), 0)
             FROM api_usage {where_clause}"
        );
        let (total_calls, total_prompt, total_completion) = match &cutoff {
            Some(cutoff) => conn.query_row(&totals_sql, [cutoff], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?,
            None => conn.query_row(&totals_sql, [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?,
        };

        let group_rows = |sql: &str| -> Result<Vec<Value>, MemoryError> {
            let mut stmt = conn.prepare(sql)?;
            let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Value> {
                Ok(json!({
                    "name": row.get::<_, String>(0)?,
                    "calls": row.get::<_, i64>(1)?,
                    "total_tokens": row.get::<_, i64>(2)?,
                }))
            };
            let rows = match &cutoff {
                Some(cutoff) => stmt.query_map([cutoff], map_row)?.collect::<Result<_, _>>()?,
                None => stmt.query_map([], map_row)?.collect::<Result<_, _>>()?,
            };
            Ok(rows)
        };

        let by_model = group_rows(&format!(
            "SELECT model, COUNT(*), COALESCE(SUM(total_tokens), 0)
             FROM api_usage {where_clause}
             GROUP BY model ORDER BY 3 DESC"
        ))?;
        let by_caller = group_rows(&format!(
            "SELECT caller, COUNT(*), COALESCE(SUM(total_tokens), 0)
             FROM api_usage {where_clause}
             GROUP BY caller ORDER BY 3 DESC"
        ))?;

        let mut stmt = conn.prepare(
            "SELECT profile_name, caller, model, prompt_tokens, completion_tokens,
                    total_tokens, created_at
             FROM api_usage ORDER BY id DESC LIMIT 25",
        )?;
        let recent_calls = stmt
            .query_map([], |row| {
                Ok(json!({
                    "profile_name": row.get::<_, String>(0)?,
                    "caller": row.get::<_, String>(1)?,
                    "model": row.get::<_, String>(2)?,
                    "prompt_tokens": row.get::<_, i64>(3)?,
                    "completion_tokens": row.get::<_, i64>(4)?,
                    "total_tokens": row.get::<_, i64>(5)?,
                    "created_at": row.get::<_, String>(6)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(UsageSummary {
            enabled: true,
            total_calls,
            total_prompt_tokens: total_prompt,
            total_completion_tokens: total_completion,
            total_tokens: total_prompt + total_completion,
            window_days: window,
            by_model,
            by_caller,
            recent_calls,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn ledger() -> ApiUsageLedger {
        ApiUsageLedger::new(MemoryStore::open_in_memory().unwrap().conn())
    }

    #[test]
    fn record_accumulates_totals() {
        let l = ledger();
        l.record("scarlet", "checkin_reply", "gpt-4o-mini", 100, 40).unwrap();
        l.record("scarlet", "chat", "gpt-4o-mini", 200, 60).unwrap();
        let s = l.summary(None).unwrap();
        assert_eq!(s.total_calls, 2);
        assert_eq!(s.total_prompt_tokens, 300);
        assert_eq!(s.total_completion_tokens, 100);
        assert_eq!(s.total_tokens, 400);
    }

    #[test]
    fn summary_groups_by_model_and_caller() {
        let l = ledger();
        l.record("p", "a", "model-x", 10, 0).unwrap();
        l.record("p", "b", "model-x", 10, 0).unwrap();
        l.record("p", "b", "model-y", 5, 0).unwrap();
        let s = l.summary(None).unwrap();
        assert_eq!(s.by_model.len(), 2);
        assert_eq!(s.by_caller.len(), 2);
        // model-x has the most tokens, so it sorts first.
        assert_eq!(s.by_model[0]["name"], "model-x");
    }

    #[test]
    fn window_days_is_clamped() {
        let l = ledger();
        let s = l.summary(Some(10_000)).unwrap();
        assert_eq!(s.window_days, Some(365));
        let s = l.summary(Some(0)).unwrap();
        assert_eq!(s.window_days, Some(1));
    }

    #[test]
    fn empty_ledger_summary_is_zeroed() {
        let s = ledger().summary(None).unwrap();
        assert_eq!(s.total_calls, 0);
        assert_eq!(s.total_tokens, 0);
        assert!(s.recent_calls.is_empty());
    }
}
