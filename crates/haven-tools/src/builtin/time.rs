// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `get_time` — current time, T0.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use haven_policy::ToolTier;

use crate::tool::{Tool, ToolOutcome};

pub struct GetTimeTool;

#[async_trait]
impl Tool for GetTimeTool {
    fn name(&self) -> &str {
        "get_time"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::T0
    }

    async fn execute(&self, _payload: &Value) -> ToolOutcome {
        let now = Utc::now();
        ToolOutcome::ok(json!({
            "epoch_seconds": now.timestamp(),
            "iso8601": now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
