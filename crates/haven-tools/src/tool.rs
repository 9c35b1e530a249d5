// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use haven_policy::ToolTier;

/// The result of executing a tool: a success flag plus a JSON object.
///
/// Tool-level failures (bad payload, missing file) are `ok: false` with
/// an `error` field — they are results, not errors, and the registry
/// records them like any other execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub ok: bool,
    pub output: Value,
}

impl ToolOutcome {
    pub fn ok(output: Value) -> Self {
        Self { ok: true, output }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: json!({ "error": message.into() }),
        }
    }
}

/// Trait every tool implements.
///
/// Tools must be side-effect-isolated: the registry guarantees an
/// approved call is *invoked* at most once, but a tool that talks to the
/// outside world owns its own idempotency beyond that.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn tier(&self) -> ToolTier;
    async fn execute(&self, payload: &Value) -> ToolOutcome;
}

/// Seam for the embeddings collaborator, so search tools stay decoupled
/// from any concrete LLM client.
#[async_trait]
pub trait QueryEmbedder: Send + Sync {
    fn model(&self) -> &str;
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f64>>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
