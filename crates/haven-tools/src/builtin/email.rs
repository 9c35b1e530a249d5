// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `request_email` — T1: ask to send an email.
//!
//! The tool itself only validates and echoes the request; the tier is
//! what matters.  Actually dispatching mail happens elsewhere, after the
//! owner approves the queued call.

use async_trait::async_trait;
use serde_json::{json, Value};

use haven_policy::ToolTier;

use crate::tool::{Tool, ToolOutcome};

const BODY_PREVIEW_CHARS: usize = 200;

pub struct RequestEmailTool;

#[async_trait]
impl Tool for RequestEmailTool {
    fn name(&self) -> &str {
        "request_email"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::T1
    }

    async fn execute(&self, payload: &Value) -> ToolOutcome {
        let to = payload.get("to").and_then(Value::as_str).unwrap_or("").trim();
        if to.is_empty() {
            return ToolOutcome::err("missing 'to' address");
        }
        let subject = payload
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        let body = payload.get("body").and_then(Value::as_str).unwrap_or("").trim();
        let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        let preview = if body.chars().count() > BODY_PREVIEW_CHARS {
            format!("{preview}...")
        } else {
            preview
        };
        ToolOutcome::ok(json!({
            "message": "Email request queued for approval",
            "to": to,
            "subject": subject,
            "body_preview": preview,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
