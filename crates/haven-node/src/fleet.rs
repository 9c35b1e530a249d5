// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Fleet control plane — per-peer reachability and deploy orchestration.
//!
//! `health_report` probes every directory node's `/health` endpoint with
//! a short timeout; `deploy_all` shells out to the repository's deploy
//! script and captures its (truncated) output.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use haven_config::NodeDirectory;

use crate::NodeError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(900);
const MAX_CAPTURED_OUTPUT: usize = 12_000;

pub struct FleetControlPlane {
    repo_root: PathBuf,
    nodes_path: PathBuf,
    deploy_script: PathBuf,
    default_health_port: u16,
    client: reqwest::Client,
}

impl FleetControlPlane {
    pub fn new(repo_root: &std::path::Path, default_health_port: u16) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            nodes_path: repo_root.join("config").join("nodes.yaml"),
            deploy_script: repo_root.join("scripts").join("deploy_all.sh"),
            default_health_port,
            client: reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .expect("reqwest client with static configuration"),
        }
    }

    /// All directory entries with their `configured` flag.
    pub fn list_nodes(&self) -> Result<Vec<Value>, NodeError> {
        let directory = NodeDirectory::load(&self.nodes_path)?;
        Ok(directory
            .entries()
            .map(|(node_id, entry)| {
                let host = entry.host.trim();
                let profile = entry
                    .profile
                    .as_deref()
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .unwrap_or(node_id);
                json!({
                    "node_id": node_id,
                    "profile": profile,
                    "host": host,
                    "user": entry.user.as_deref().map(str::trim).filter(|u| !u.is_empty()),
                    "configured": !host.is_empty() && !host.ends_with(".TBD"),
                })
            })
            .collect())
    }

    /// Probe every node's `/health` endpoint.
    pub async fn health_report(&self) -> Result<Value, NodeError> {
        let mut report_nodes = Vec::new();
        for node in self.list_nodes()? {
            let checked_at = chrono::Utc::now().timestamp();
            if !node["configured"].as_bool().unwrap_or(false) {
                report_nodes.push(merged(
                    &node,
                    json!({
                        "reachable": false,
                        "status": "unconfigured",
                        "last_seen": null,
                        "error": "host not configured",
                    }),
                ));
                continue;
            }
            let url = format!(
                "http://{}:{}/health",
                node["host"].as_str().unwrap_or(""),
                self.default_health_port
            );
            match self.probe(&url).await {
                Ok(health) => report_nodes.push(merged(
                    &node,
                    json!({
                        "reachable": true,
                        "status": health["status"].as_str().unwrap_or("unknown"),
                        "last_seen": checked_at,
                        "health": health,
                    }),
                )),
                Err(e) => report_nodes.push(merged(
                    &node,
                    json!({
                        "reachable": false,
                        "status": "down",
                        "last_seen": null,
                        "error": e,
                    }),
                )),
            }
        }
        Ok(json!({
            "checked_at": chrono::Utc::now().timestamp(),
            "nodes": report_nodes,
        }))
    }

    async fn probe(&self, url: &str) -> Result<Value, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        response.json::<Value>().await.map_err(|e| e.to_string())
    }

    /// Run the fleet deploy script; output is captured and truncated.
    pub async fn deploy_all(&self) -> Value {
        if !self.deploy_script.exists() {
            return json!({
                "ok": false,
                "error": format!("missing script: {}", self.deploy_script.display()),
            });
        }
        let run = tokio::process::Command::new(&self.deploy_script)
            .current_dir(&self.repo_root)
            .output();
        let output = match tokio::time::timeout(DEPLOY_TIMEOUT, run).await {
            Err(_) => {
                warn!("fleet deploy timed out");
                return json!({ "ok": false, "error": "deploy script timed out" });
            }
            Ok(Err(e)) => {
                return json!({
                    "ok": false,
                    "error": format!("spawning {}: {e}", self.deploy_script.display()),
                });
            }
            Ok(Ok(output)) => output,
        };
        json!({
            "ok": output.status.success(),
            "returncode": output.status.code(),
            "stdout": tail_chars(&String::from_utf8_lossy(&output.stdout)),
            "stderr": tail_chars(&String::from_utf8_lossy(&output.stderr)),
        })
    }
}

fn merged(base: &Value, extra: Value) -> Value {
    let mut out = base.clone();
    if let (Some(out_map), Value::Object(extra_map)) = (out.as_object_mut(), extra) {
        out_map.extend(extra_map);
    }
    out
}

fn tail_chars(text: &str) -> String {
    let count = text.chars().count();
    if count <= MAX_CAPTURED_OUTPUT {
        text.to_string()
    } else {
        text.chars().skip(count - MAX_CAPTURED_OUTPUT).collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
