// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `idea_search` — T1: semantic search over vector memory.
//!
//! Embeds the query through the embeddings collaborator and ranks stored
//! chunks by cosine similarity.  Without an embeddings client the tool
//! degrades to an explicit error — never to a silent empty result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use haven_memory::VectorStore;
use haven_policy::ToolTier;

use crate::tool::{QueryEmbedder, Tool, ToolOutcome};

const DEFAULT_LIMIT: u64 = 8;
const MAX_LIMIT: u64 = 25;

pub struct IdeaSearchTool {
    vector: VectorStore,
    embedder: Option<Arc<dyn QueryEmbedder>>,
}

impl IdeaSearchTool {
    pub fn new(vector: VectorStore, embedder: Option<Arc<dyn QueryEmbedder>>) -> Self {
        Self { vector, embedder }
    }
}

fn scope_kinds(scope: &str) -> Option<Option<&'static [&'static str]>> {
    match scope {
        "all" => Some(None),
        "ideas" => Some(Some(&["project_idea"])),
        "messages" => Some(Some(&["interop_message"])),
        _ => None,
    }
}

#[async_trait]
impl Tool for IdeaSearchTool {
    fn name(&self) -> &str {
        "idea_search"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::T1
    }

    async fn execute(&self, payload: &Value) -> ToolOutcome {
        let query = payload
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if query.is_empty() {
            return ToolOutcome::err("missing query");
        }
        let limit = payload
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT) as usize;
        let scope = payload
            .get("scope")
            .and_then(Value::as_str)
            .map(str::trim)
            .map(str::to_lowercase)
            .unwrap_or_else(|| "all".to_string());
        let Some(kinds) = scope_kinds(&scope) else {
            return ToolOutcome::err("scope must be one of: all, ideas, messages");
        };

        let Some(embedder) = &self.embedder else {
            return ToolOutcome::err("LLM API key missing for embeddings");
        };
        let query_embedding = match embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => return ToolOutcome::err(format!("embedding query: {e}")),
        };

        let matches = match self.vector.search(&query_embedding, kinds, limit) {
            Ok(m) => m,
            Err(e) => return ToolOutcome::err(format!("vector search: {e}")),
        };
        ToolOutcome::ok(json!({
            "query": query,
            "scope": scope,
            "embedding_model": embedder.model(),
            "matches": matches,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use haven_memory::MemoryStore;

    struct FixedEmbedder(Vec<f64>);

    #[async_trait]
    impl QueryEmbedder for FixedEmbedder {
        fn model(&self) -> &str {
            "test-embed"
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    fn vector_store() -> VectorStore {
        VectorStore::new(MemoryStore::open_in_memory().unwrap().conn())
    }

    #[tokio::test]
    async fn missing_embedder_degrades_to_error() {
        let tool = IdeaSearchTool::new(vector_store(), None);
        let out = tool.execute(&json!({"query": "solar"})).await;
        assert!(!out.ok);
        assert!(out.output["error"].as_str().unwrap().contains("key missing"));
    }

    #[tokio::test]
    async fn searches_and_ranks_matches() {
        let vector = vector_store();
        vector
            .replace_chunks(
                "project_idea",
                1,
                None,
                &[(0, "solar tracker".into(), vec![1.0, 0.0])],
                "test-embed",
            )
            .unwrap();
        let tool = IdeaSearchTool::new(vector, Some(Arc::new(FixedEmbedder(vec![1.0, 0.0]))));
        let out = tool.execute(&json!({"query": "solar", "scope": "ideas"})).await;
        assert!(out.ok);
        assert_eq!(out.output["embedding_model"], "test-embed");
        let matches = out.output["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["text_chunk"], "solar tracker");
    }

    #[tokio::test]
    async fn unknown_scope_is_rejected() {
        let tool = IdeaSearchTool::new(
            vector_store(),
            Some(Arc::new(FixedEmbedder(vec![1.0]))),
        );
        let out = tool.execute(&json!({"query": "x", "scope": "everything"})).await;
        assert!(!out.ok);
    }
}
