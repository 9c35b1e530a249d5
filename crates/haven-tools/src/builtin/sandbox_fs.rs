// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `sandbox_list` and `sandbox_read_text` — T0 filesystem tools confined
//! to the profile's sandbox subtree.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use haven_policy::ToolTier;

use crate::sandbox::Sandbox;
use crate::tool::{Tool, ToolOutcome};

const MAX_PREVIEW_CHARS: usize = 4000;
const MAX_LIST_ENTRIES: u64 = 500;

pub struct SandboxListTool {
    sandbox: Arc<Sandbox>,
}

impl SandboxListTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for SandboxListTool {
    fn name(&self) -> &str {
        "sandbox_list"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::T0
    }

    async fn execute(&self, payload: &Value) -> ToolOutcome {
        let subpath = payload.get("subpath").and_then(Value::as_str).unwrap_or(".");
        let max_entries = payload
            .get("max_entries")
            .and_then(Value::as_u64)
            .unwrap_or(100)
            .clamp(1, MAX_LIST_ENTRIES) as usize;

        let target = match self.sandbox.resolve(subpath) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err(e.to_string()),
        };
        if !target.exists() {
            return ToolOutcome::err(format!("path does not exist: {}", target.display()));
        }
        if !target.is_dir() {
            return ToolOutcome::err(format!("not a directory: {}", target.display()));
        }

        let mut children = match std::fs::read_dir(&target) {
            Ok(iter) => iter.filter_map(Result::ok).collect::<Vec<_>>(),
            Err(e) => return ToolOutcome::err(format!("listing {}: {e}", target.display())),
        };
        children.sort_by_key(|c| c.file_name());

        let entries: Vec<Value> = children
            .into_iter()
            .take(max_entries)
            .map(|child| {
                let path = child.path();
                let is_dir = path.is_dir();
                let relative = path
                    .strip_prefix(self.sandbox.root())
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| path.display().to_string());
                json!({
                    "name": child.file_name().to_string_lossy(),
                    "relative_path": relative,
                    "kind": if is_dir { "dir" } else { "file" },
                    "size_bytes": if is_dir {
                        Value::Null
                    } else {
                        child.metadata().map(|m| json!(m.len())).unwrap_or(Value::Null)
                    },
                })
            })
            .collect();

        ToolOutcome::ok(json!({
            "root": self.sandbox.root().display().to_string(),
            "target": target.display().to_string(),
            "count": entries.len(),
            "entries": entries,
        }))
    }
}

pub struct SandboxReadTextTool {
    sandbox: Arc<Sandbox>,
}

impl SandboxReadTextTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for SandboxReadTextTool {
    fn name(&self) -> &str {
        "sandbox_read_text"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::T0
    }

    async fn execute(&self, payload: &Value) -> ToolOutcome {
        let path = payload
            .get("path")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if path.is_empty() {
            return ToolOutcome::err("missing 'path'");
        }
        let target = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err(e.to_string()),
        };
        if !target.exists() {
            return ToolOutcome::err(format!("path does not exist: {}", target.display()));
        }
        if !target.is_file() {
            return ToolOutcome::err(format!("not a file: {}", target.display()));
        }

        let bytes = match std::fs::read(&target) {
            Ok(b) => b,
            Err(e) => return ToolOutcome::err(format!("reading {}: {e}", target.display())),
        };
        let Ok(text) = String::from_utf8(bytes) else {
            return ToolOutcome::err("file is not UTF-8 text");
        };

        let chars = text.chars().count();
        let preview: String = text.chars().take(MAX_PREVIEW_CHARS).collect();
        ToolOutcome::ok(json!({
            "path": target.display().to_string(),
            "chars": chars,
            "truncated": chars > MAX_PREVIEW_CHARS,
            "preview": preview,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
