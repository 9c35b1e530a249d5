// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `runtime_diagnostics` — lightweight host snapshot, T0.

use async_trait::async_trait;
use serde_json::{json, Value};

use haven_policy::ToolTier;

use crate::tool::{Tool, ToolOutcome};

pub struct RuntimeDiagnosticsTool {
    profile_name: String,
}

impl RuntimeDiagnosticsTool {
    pub fn new(profile_name: &str) -> Self {
        Self { profile_name: profile_name.to_string() }
    }
}

#[async_trait]
impl Tool for RuntimeDiagnosticsTool {
    fn name(&self) -> &str {
        "runtime_diagnostics"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::T0
    }

    async fn execute(&self, _payload: &Value) -> ToolOutcome {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        ToolOutcome::ok(json!({
            "profile": self.profile_name,
            "host": host,
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "cwd": cwd,
            "timestamp": chrono::Utc::now().timestamp(),
            "load_avg": load_average(),
        }))
    }
}

/// 1/5/15-minute load averages, where the platform exposes them.
fn load_average() -> Option<Vec<f64>> {
    #[cfg(target_os = "linux")]
    {
        let text = std::fs::read_to_string("/proc/loadavg").ok()?;
        let values: Vec<f64> = text
            .split_whitespace()
            .take(3)
            .filter_map(|v| v.parse().ok())
            .collect();
        (values.len() == 3).then_some(values)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
