// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Project items — durable records of ideas and ongoing work.

use serde::Serialize;

use crate::store::{lock, SharedConn};
use crate::MemoryError;

#[derive(Debug, Clone, Serialize)]
pub struct ProjectItem {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectItem> {
    Ok(ProjectItem {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const ITEM_COLUMNS: &str = "id, title, body, status, created_at, updated_at";

#[derive(Clone)]
pub struct ProjectStore {
    conn: SharedConn,
}

impl ProjectStore {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    pub fn create(&self, title: &str, body: &str, status: &str) -> Result<i64, MemoryError> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO project_items (title, body, status) VALUES (?1, ?2, ?3)",
            rusqlite::params![title, body, status],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Patch any of title/body/status; refreshes `updated_at`.  Returns
    /// false when nothing was changed (no fields given or unknown id).
    pub fn update(
        &self,
        id: i64,
        title: Option<&str>,
        body: Option<&str>,
        status: Option<&str>,
    ) -> Result<bool, MemoryError> {
        let mut fields = Vec::new();
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(t) = title.as_ref() {
            fields.push("title = ?");
            values.push(t);
        }
        if let Some(b) = body.as_ref() {
            fields.push("body = ?");
            values.push(b);
        }
        if let Some(s) = status.as_ref() {
            fields.push("status = ?");
            values.push(s);
        }
        if fields.is_empty() {
            return Ok(false);
        }
        values.push(&id);
        let sql = format!(
            "UPDATE project_items SET {}, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            fields.join(", ")
        );
        let conn = lock(&self.conn);
        let changed = conn.execute(&sql, values.as_slice())?;
        Ok(changed > 0)
    }

    pub fn delete(&self, id: i64) -> Result<bool, MemoryError> {
        let conn = lock(&self.conn);
        let changed = conn.execute("DELETE FROM project_items WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    pub fn get(&self, id: i64) -> Result<Option<ProjectItem>, MemoryError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM project_items WHERE id = ?1"
        ))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(item_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Recently-touched items, optionally filtered by status.
    pub fn latest(&self, limit: u32, status: Option<&str>) -> Result<Vec<ProjectItem>, MemoryError> {
        let conn = lock(&self.conn);
        let items = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM project_items
                     WHERE status = ?1 ORDER BY updated_at DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(rusqlite::params![status, limit], item_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM project_items
                     ORDER BY updated_at DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map([limit], item_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(items)
    }

    /// Substring search over title and body.
    pub fn search_like(&self, query: &str, limit: u32) -> Result<Vec<ProjectItem>, MemoryError> {
        let term = format!("%{}%", query.trim());
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM project_items
             WHERE title LIKE ?1 OR body LIKE ?1
             ORDER BY updated_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(rusqlite::params![term, limit], item_from_row)?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn store() -> ProjectStore {
        ProjectStore::new(MemoryStore::open_in_memory().unwrap().conn())
    }

    #[test]
    fn create_and_get() {
        let s = store();
        let id = s.create("garden bot", "water the plants", "active").unwrap();
        let item = s.get(id).unwrap().unwrap();
        assert_eq!(item.title, "garden bot");
        assert_eq!(item.status, "active");
    }

    #[test]
    fn update_patches_given_fields_only() {
        let s = store();
        let id = s.create("t", "b", "active").unwrap();
        assert!(s.update(id, None, None, Some("done")).unwrap());
        let item = s.get(id).unwrap().unwrap();
        assert_eq!(item.status, "done");
        assert_eq!(item.title, "t");
    }

    #[test]
    fn update_with_no_fields_is_a_noop() {
        let s = store();
        let id = s.create("t", "b", "active").unwrap();
        assert!(!s.update(id, None, None, None).unwrap());
    }

    #[test]
    fn update_unknown_id_returns_false() {
        assert!(!store().update(99, Some("x"), None, None).unwrap());
    }

    #[test]
    fn delete_removes_item() {
        let s = store();
        let id = s.create("t", "b", "active").unwrap();
        assert!(s.delete(id).unwrap());
        assert!(s.get(id).unwrap().is_none());
    }

    #[test]
    fn latest_filters_by_status() {
        let s = store();
        s.create("a", "x", "active").unwrap();
        s.create("b", "y", "done").unwrap();
        let done = s.latest(10, Some("done")).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].title, "b");
        assert_eq!(s.latest(10, None).unwrap().len(), 2);
    }

    #[test]
    fn search_like_matches_title_and_body() {
        let s = store();
        s.create("solar tracker", "panel alignment", "active").unwrap();
        s.create("notes", "about solar output", "active").unwrap();
        assert_eq!(s.search_like("solar", 10).unwrap().len(), 2);
        assert_eq!(s.search_like("panel", 10).unwrap().len(), 1);
    }
}
