// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Profile facts — explicit key/value memory about the node's owner and
//! runtime (`runtime_profile`, `policy_tier`, preferences, …).

use serde::Serialize;

use crate::store::{lock, SharedConn};
use crate::MemoryError;

#[derive(Debug, Clone, Serialize)]
pub struct ProfileFact {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct ProfileFacts {
    conn: SharedConn,
}

impl ProfileFacts {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Insert or overwrite a fact, refreshing its timestamp.
    pub fn set(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO profile_facts (key, value, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = CURRENT_TIMESTAMP",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare("SELECT value FROM profile_facts WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, key: &str) -> Result<bool, MemoryError> {
        let conn = lock(&self.conn);
        let changed = conn.execute("DELETE FROM profile_facts WHERE key = ?1", [key])?;
        Ok(changed > 0)
    }

    pub fn list(&self) -> Result<Vec<ProfileFact>, MemoryError> {
        let conn = lock(&self.conn);
        let mut stmt =
            conn.prepare("SELECT key, value, updated_at FROM profile_facts ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(ProfileFact {
                key: row.get(0)?,
                value: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn facts() -> ProfileFacts {
        ProfileFacts::new(MemoryStore::open_in_memory().unwrap().conn())
    }

    #[test]
    fn set_then_get_round_trips() {
        let f = facts();
        f.set("runtime_profile", "scarlet").unwrap();
        assert_eq!(f.get("runtime_profile").unwrap().as_deref(), Some("scarlet"));
    }

    #[test]
    fn set_overwrites_existing_key() {
        let f = facts();
        f.set("mood", "curious").unwrap();
        f.set("mood", "focused").unwrap();
        assert_eq!(f.get("mood").unwrap().as_deref(), Some("focused"));
        assert_eq!(f.list().unwrap().len(), 1);
    }

    #[test]
    fn get_missing_key_is_none() {
        assert!(facts().get("nothing").unwrap().is_none());
    }

    #[test]
    fn delete_reports_whether_key_existed() {
        let f = facts();
        f.set("k", "v").unwrap();
        assert!(f.delete("k").unwrap());
        assert!(!f.delete("k").unwrap());
    }

    #[test]
    fn list_is_sorted_by_key() {
        let f = facts();
        f.set("zebra", "1").unwrap();
        f.set("apple", "2").unwrap();
        let keys: Vec<_> = f.list().unwrap().into_iter().map(|x| x.key).collect();
        assert_eq!(keys, vec!["apple", "zebra"]);
    }
}
