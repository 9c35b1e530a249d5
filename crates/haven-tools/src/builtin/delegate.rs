// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `delegate_node_task` — T2: hand a bounded task to a peer node over
//! the interop bridge.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use haven_interop::{InteropBridge, Route};
use haven_policy::ToolTier;

use crate::tool::{Tool, ToolOutcome};

pub struct DelegateNodeTaskTool {
    bridge: Arc<InteropBridge>,
}

impl DelegateNodeTaskTool {
    pub fn new(bridge: Arc<InteropBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for DelegateNodeTaskTool {
    fn name(&self) -> &str {
        "delegate_node_task"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::T2
    }

    async fn execute(&self, payload: &Value) -> ToolOutcome {
        let target = payload
            .get("target_profile")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if target.is_empty() {
            return ToolOutcome::err("missing target_profile");
        }
        let task_type = payload
            .get("task_type")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if task_type.is_empty() {
            return ToolOutcome::err("missing task_type");
        }
        let Some(task_payload) = payload.get("task_payload").filter(|p| p.is_object()) else {
            return ToolOutcome::err("task_payload must be an object");
        };

        match self
            .bridge
            .send_task(target, task_type, task_payload.clone(), Route::Auto)
            .await
        {
            Ok(outcome) => {
                ToolOutcome::ok(serde_json::to_value(&outcome).unwrap_or_else(|_| json!({})))
            }
            Err(err) => ToolOutcome::err(err.to_string()),
        }
    }
}
