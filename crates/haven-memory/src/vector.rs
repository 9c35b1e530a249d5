// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Vector memory — stored embeddings with brute-force cosine search.
//!
//! Embeddings arrive as JSON float arrays from the embeddings
//! collaborator and are scanned linearly at query time (the table is
//! capped at the 2000 newest chunks per search, which is plenty for a
//! personal node).

use serde::Serialize;
use serde_json::Value;

use crate::store::{lock, SharedConn};
use crate::MemoryError;

/// One chunk to store: `(chunk_index, text, embedding)`.
pub type EmbeddedChunk = (i64, String, Vec<f64>);

#[derive(Debug, Clone, Serialize)]
pub struct VectorMatch {
    pub id: i64,
    pub source_kind: String,
    pub source_id: i64,
    pub source_ref: Option<String>,
    pub chunk_index: i64,
    pub text_chunk: String,
    pub embedding_model: String,
    pub created_at: String,
    pub score: f64,
}

pub(crate) fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b = b.iter().map(|y| y * y).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[derive(Clone)]
pub struct VectorStore {
    conn: SharedConn,
}

impl VectorStore {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Replace every chunk stored for `(source_kind, source_id)`.
    pub fn replace_chunks(
        &self,
        source_kind: &str,
        source_id: i64,
        source_ref: Option<&str>,
        chunks: &[EmbeddedChunk],
        embedding_model: &str,
    ) -> Result<(), MemoryError> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM memory_embeddings WHERE source_kind = ?1 AND source_id = ?2",
            rusqlite::params![source_kind, source_id],
        )?;
        for (chunk_index, text_chunk, embedding) in chunks {
            tx.execute(
                "INSERT INTO memory_embeddings
                     (source_kind, source_id, source_ref, chunk_index, text_chunk,
                      embedding_json, embedding_model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    source_kind,
                    source_id,
                    source_ref,
                    chunk_index,
                    text_chunk,
                    serde_json::to_string(embedding)?,
                    embedding_model
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Cosine search over the newest stored chunks, optionally filtered
    /// by source kind.  Chunks whose stored embedding fails to parse are
    /// skipped.
    pub fn search(
        &self,
        query_embedding: &[f64],
        source_kinds: Option<&[&str]>,
        limit: usize,
    ) -> Result<Vec<VectorMatch>, MemoryError> {
        let conn = lock(&self.conn);
        let mut candidates: Vec<(VectorMatch, String)> = Vec::new();

        let mut collect = |stmt: &mut rusqlite::Statement<'_>,
                           params: &[&dyn rusqlite::ToSql]|
         -> Result<(), MemoryError> {
            let rows = stmt.query_map(params, |row| {
                Ok((
                    VectorMatch {
                        id: row.get(0)?,
                        source_kind: row.get(1)?,
                        source_id: row.get(2)?,
                        source_ref: row.get(3)?,
                        chunk_index: row.get(4)?,
                        text_chunk: row.get(5)?,
                        embedding_model: row.get(7)?,
                        created_at: row.get(8)?,
                        score: 0.0,
                    },
                    row.get::<_, String>(6)?,
                ))
            })?;
            for row in rows {
                candidates.push(row?);
            }
            Ok(())
        };

        match source_kinds {
            Some(kinds) if !kinds.is_empty() => {
                let placeholders = (1..=kinds.len())
                    .map(|i| format!("?{i}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT id, source_kind, source_id, source_ref, chunk_index, text_chunk,
                            embedding_json, embedding_model, created_at
                     FROM memory_embeddings
                     WHERE source_kind IN ({placeholders})
                     ORDER BY id DESC LIMIT 2000"
                );
                let mut stmt = conn.prepare(&sql)?;
                let params: Vec<&dyn rusqlite::ToSql> =
                    kinds.iter().map(|k| k as &dyn rusqlite::ToSql).collect();
                collect(&mut stmt, &params)?;
            }
            _ => {
                let mut stmt = conn.prepare(
                    "SELECT id, source_kind, source_id, source_ref, chunk_index, text_chunk,
                            embedding_json, embedding_model, created_at
                     FROM memory_embeddings
                     ORDER BY id DESC LIMIT 2000",
                )?;
                collect(&mut stmt, &[])?;
            }
        }

        let mut scored: Vec<VectorMatch> = candidates
            .into_iter()
            .filter_map(|(mut m, embedding_json)| {
                let embedding: Vec<f64> = match serde_json::from_str::<Value>(&embedding_json) {
                    Ok(Value::Array(values)) => values
                        .into_iter()
                        .map(|v| v.as_f64())
                        .collect::<Option<Vec<f64>>>()?,
                    _ => return None,
                };
                m.score = cosine_similarity(query_embedding, &embedding);
                Some(m)
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit.max(1));
        Ok(scored)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
