// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Central tool registry with policy and approval gating.
//!
//! # `execute` pipeline
//!
//! 1. unknown name → error outcome;
//! 2. policy `deny` → `tool_denied` event, error outcome;
//! 3. policy `require_approval` → durable enqueue,
//!    `tool_queued_for_approval` event, `{approval_required, approval_id}`;
//! 4. policy `allow` → run, `tool_executed` event, tool's outcome.
//!
//! # `execute_approved` pipeline
//!
//! Loads the approval, refuses anything not `approved`, and replays the
//! stored result when the action already executed — so a double-click on
//! "run" invokes the tool once.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use haven_memory::{ApprovalQueue, EpisodicLog};
use haven_policy::{PolicyDecision, PolicyEngine};

use crate::tool::{Tool, ToolOutcome};

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    policy: PolicyEngine,
    approvals: ApprovalQueue,
    episodic: EpisodicLog,
    profile_name: String,
}

impl ToolRegistry {
    pub fn new(
        policy: PolicyEngine,
        approvals: ApprovalQueue,
        episodic: EpisodicLog,
        profile_name: &str,
    ) -> Self {
        Self {
            tools: HashMap::new(),
            policy,
            approvals,
            episodic,
            profile_name: profile_name.to_string(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    fn record(
        &self,
        event_type: &str,
        payload: Value,
        tool_name: Option<&str>,
        decision: &str,
    ) {
        if let Err(e) = self
            .episodic
            .record(event_type, &payload, tool_name, Some(decision))
        {
            warn!(event = event_type, error = %e, "episodic record failed");
        }
    }

    /// Run a tool through the policy gate.
    pub async fn execute(&self, tool_name: &str, payload: Value) -> ToolOutcome {
        let Some(tool) = self.tools.get(tool_name) else {
            return ToolOutcome::err(format!("unknown tool: {tool_name}"));
        };

        let verdict = self.policy.check(tool_name, tool.tier());
        match verdict.decision {
            PolicyDecision::Deny => {
                self.record(
                    "tool_denied",
                    json!({
                        "tool_name": tool_name,
                        "reason": verdict.reason,
                        "payload": payload,
                    }),
                    Some(tool_name),
                    verdict.decision.as_str(),
                );
                ToolOutcome::err(verdict.reason)
            }
            PolicyDecision::RequireApproval => {
                let approval_id = match self.approvals.enqueue(
                    &self.profile_name,
                    tool_name,
                    tool.tier().as_str(),
                    &payload,
                ) {
                    Ok(id) => id,
                    Err(e) => return ToolOutcome::err(format!("approval enqueue failed: {e}")),
                };
                self.record(
                    "tool_queued_for_approval",
                    json!({
                        "approval_id": approval_id,
                        "tool_name": tool_name,
                        "payload": payload,
                    }),
                    Some(tool_name),
                    verdict.decision.as_str(),
                );
                ToolOutcome {
                    ok: false,
                    output: json!({
                        "approval_required": true,
                        "approval_id": approval_id,
                        "reason": verdict.reason,
                    }),
                }
            }
            PolicyDecision::Allow => {
                let result = tool.execute(&payload).await;
                self.record(
                    "tool_executed",
                    json!({
                        "tool_name": tool_name,
                        "payload": payload,
                        "output": result.output,
                    }),
                    Some(tool_name),
                    verdict.decision.as_str(),
                );
                result
            }
        }
    }

    /// Run a previously approved action, exactly once.
    pub async fn execute_approved(&self, approval_id: i64) -> ToolOutcome {
        let approval = match self.approvals.get(approval_id) {
            Ok(Some(a)) => a,
            Ok(None) => return ToolOutcome::err("approval not found"),
            Err(e) => return ToolOutcome::err(format!("approval lookup failed: {e}")),
        };
        if approval.status != "approved" {
            return ToolOutcome::err(format!("approval {approval_id} is not approved"));
        }
        if approval.execution_status == "executed" {
            return ToolOutcome::ok(json!({
                "already_executed": true,
                "approval_id": approval_id,
                "execution_result": approval.execution_result.unwrap_or_else(|| json!({})),
            }));
        }

        let Some(tool) = self.tools.get(&approval.tool_name) else {
            return ToolOutcome::err(format!("unknown tool: {}", approval.tool_name));
        };
        let result = tool.execute(&approval.payload).await;
        let persisted = self
            .approvals
            .mark_executed(
                approval_id,
                &json!({ "ok": result.ok, "output": result.output }),
            )
            .unwrap_or_else(|e| {
                warn!(approval_id, error = %e, "mark_executed failed");
                false
            });
        self.record(
            "tool_executed_after_approval",
            json!({
                "approval_id": approval_id,
                "tool_name": approval.tool_name,
                "payload": approval.payload,
                "result": result.output,
                "execution_status_persisted": persisted,
            }),
            Some(&approval.tool_name),
            PolicyDecision::Allow.as_str(),
        );
        result
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use haven_memory::MemoryStore;
    use haven_policy::ToolTier;

    /// Counts invocations so tests can assert at-most-once semantics.
    struct CountingTool {
        name: &'static str,
        tier: ToolTier,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn tier(&self) -> ToolTier {
            self.tier
        }
        async fn execute(&self, payload: &Value) -> ToolOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ToolOutcome::ok(json!({ "echo": payload }))
        }
    }

    struct Harness {
        registry: ToolRegistry,
        approvals: ApprovalQueue,
        episodic: EpisodicLog,
        calls: Arc<AtomicUsize>,
    }

    fn harness(allowed: &[ToolTier], tool_tier: ToolTier) -> Harness {
        let store = MemoryStore::open_in_memory().unwrap();
        let approvals = ApprovalQueue::new(store.conn());
        let episodic = EpisodicLog::new(store.conn());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new(
            PolicyEngine::from_tiers(allowed.iter().copied()),
            approvals.clone(),
            episodic.clone(),
            "scarlet",
        );
        registry.register(CountingTool {
            name: "probe",
            tier: tool_tier,
            calls: calls.clone(),
        });
        Harness { registry, approvals, episodic, calls }
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_outcome() {
        let h = harness(&[ToolTier::T0], ToolTier::T0);
        let out = h.registry.execute("nope", json!({})).await;
        assert!(!out.ok);
        assert!(out.output["error"].as_str().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn t0_tool_runs_directly_and_logs_execution() {
        let h = harness(&[ToolTier::T0], ToolTier::T0);
        let out = h.registry.execute("probe", json!({"n": 1})).await;
        assert!(out.ok);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        let events = h.episodic.latest(10).unwrap();
        assert_eq!(events[0].event_type, "tool_executed");
        assert_eq!(events[0].decision.as_deref(), Some("allow"));
    }

    #[tokio::test]
    async fn denied_tool_logs_deny_and_creates_no_approval() {
        // A T1 tool under a T0-only profile.
        let h = harness(&[ToolTier::T0], ToolTier::T1);
        let out = h.registry.execute("probe", json!({})).await;
        assert!(!out.ok);
        assert!(out.output["error"].as_str().unwrap().contains("T1 not permitted"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(h.approvals.list_pending(10).unwrap().is_empty());
        let events = h.episodic.latest(10).unwrap();
        assert_eq!(events[0].event_type, "tool_denied");
        assert_eq!(events[0].decision.as_deref(), Some("deny"));
    }

    #[tokio::test]
    async fn t1_tool_is_queued_for_approval() {
        let h = harness(&[ToolTier::T0, ToolTier::T1], ToolTier::T1);
        let out = h.registry.execute("probe", json!({"to": "a@b"})).await;
        assert!(!out.ok);
        assert_eq!(out.output["approval_required"], true);
        let approval_id = out.output["approval_id"].as_i64().unwrap();
        assert!(out.output["reason"].as_str().unwrap().contains("T1"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0, "tool must not run yet");

        let record = h.approvals.get(approval_id).unwrap().unwrap();
        assert_eq!(record.status, "pending");
        assert_eq!(record.payload, json!({"to": "a@b"}));
    }

    #[tokio::test]
    async fn approved_action_executes_once_then_replays() {
        let h = harness(&[ToolTier::T0, ToolTier::T1], ToolTier::T1);
        let queued = h.registry.execute("probe", json!({"x": 7})).await;
        let approval_id = queued.output["approval_id"].as_i64().unwrap();

        assert!(h.approvals.resolve(approval_id, true).unwrap());
        let first = h.registry.execute_approved(approval_id).await;
        assert!(first.ok);
        assert_eq!(first.output["echo"], json!({"x": 7}));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let second = h.registry.execute_approved(approval_id).await;
        assert!(second.ok);
        assert_eq!(second.output["already_executed"], true);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1, "one side effect only");

        let events = h.episodic.latest(10).unwrap();
        assert!(events.iter().any(|e| e.event_type == "tool_executed_after_approval"));
    }

    #[tokio::test]
    async fn pending_approval_cannot_execute() {
        let h = harness(&[ToolTier::T1], ToolTier::T1);
        let queued = h.registry.execute("probe", json!({})).await;
        let approval_id = queued.output["approval_id"].as_i64().unwrap();
        let out = h.registry.execute_approved(approval_id).await;
        assert!(!out.ok);
        assert!(out.output["error"].as_str().unwrap().contains("not approved"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_approval_cannot_execute() {
        let h = harness(&[ToolTier::T1], ToolTier::T1);
        let queued = h.registry.execute("probe", json!({})).await;
        let approval_id = queued.output["approval_id"].as_i64().unwrap();
        h.approvals.resolve(approval_id, false).unwrap();
        let out = h.registry.execute_approved(approval_id).await;
        assert!(!out.ok);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_approval_is_an_error() {
        let h = harness(&[ToolTier::T0], ToolTier::T0);
        let out = h.registry.execute_approved(12345).await;
        assert!(!out.ok);
        assert!(out.output["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn list_tools_is_sorted() {
        let mut h = harness(&[ToolTier::T0], ToolTier::T0);
        h.registry.register(CountingTool {
            name: "alpha",
            tier: ToolTier::T0,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        assert_eq!(h.registry.list_tools(), vec!["alpha", "probe"]);
        assert_eq!(h.registry.count(), 2);
    }
}
