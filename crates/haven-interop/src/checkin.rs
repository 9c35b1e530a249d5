// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Daily skills check-in scheduler.
//!
//! A background task that wakes periodically (hourly by default) and, for
//! each configured peer, sends a `skills_checkin` envelope at most once
//! per interval (daily by default).  The outbox itself is the scheduling
//! state: a peer is due when it has no successfully-sent `skills_checkin`
//! row younger than the interval.
//!
//! Shutdown is cooperative via the supervisor's [`CancellationToken`]; an
//! in-flight round finishes, then the loop exits.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use haven_config::SkillManifest;
use haven_memory::EpisodicLog;

use crate::bridge::{InteropBridge, Route};
use crate::envelope::now_epoch;
use crate::InteropError;

const CHECKIN_TASK_TYPE: &str = "skills_checkin";
const CHECKIN_QUESTION: &str = "Hey, do you have any cool new skills today?";

/// Timing knobs, split out so tests can shrink them.
#[derive(Debug, Clone)]
pub struct CheckinSettings {
    /// How often the scheduler wakes to look for due peers.
    pub wake_period: Duration,
    /// Minimum seconds between check-ins to the same peer.
    pub interval_seconds: i64,
}

impl Default for CheckinSettings {
    fn default() -> Self {
        Self {
            wake_period: Duration::from_secs(3600),
            interval_seconds: 86_400,
        }
    }
}

/// Result of one per-peer attempt in a round.
#[derive(Debug)]
pub struct CheckinResult {
    pub target: String,
    pub ok: bool,
    pub detail: serde_json::Value,
}

pub struct CheckinScheduler {
    bridge: Arc<InteropBridge>,
    episodic: EpisodicLog,
    skills: SkillManifest,
    settings: CheckinSettings,
    cancel: CancellationToken,
}

impl CheckinScheduler {
    pub fn new(
        bridge: Arc<InteropBridge>,
        episodic: EpisodicLog,
        skills: SkillManifest,
        settings: CheckinSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self { bridge, episodic, skills, settings, cancel }
    }

    /// Run until cancelled.  Each wake sends one round of due check-ins.
    pub async fn run(self) {
        info!(
            wake_period_s = self.settings.wake_period.as_secs(),
            interval_s = self.settings.interval_seconds,
            "check-in scheduler started"
        );
        loop {
            match self.send_due_checkins().await {
                Ok(results) => {
                    for item in &results {
                        let decision = if item.ok { "allow" } else { "deny" };
                        if let Err(e) = self.episodic.record(
                            "interop_skills_checkin_sent",
                            &json!({
                                "target": item.target,
                                "ok": item.ok,
                                "detail": item.detail,
                            }),
                            None,
                            Some(decision),
                        ) {
                            warn!(error = %e, "failed to record check-in result");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "check-in round failed");
                    let _ = self.episodic.record(
                        "interop_skills_checkin_error",
                        &json!({ "error": e.to_string() }),
                        None,
                        Some("deny"),
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.wake_period) => {}
            }
        }
        info!("check-in scheduler stopped");
    }

    /// One round: send a check-in to every configured peer that has not
    /// received one within the interval.
    pub async fn send_due_checkins(&self) -> Result<Vec<CheckinResult>, InteropError> {
        let now = now_epoch();
        let skills_manifest = self.skills.list_ids().unwrap_or_default();
        let mut results = Vec::new();

        for target in self.bridge.configured_peers()? {
            let last_sent = self
                .bridge
                .message_log()
                .last_sent_timestamp(&target, CHECKIN_TASK_TYPE)?;
            if let Some(last) = last_sent {
                if now - last < self.settings.interval_seconds {
                    debug!(peer = %target, "check-in not due yet");
                    continue;
                }
            }

            let payload = json!({
                "kind": "daily_skills_checkin",
                "question": CHECKIN_QUESTION,
                "requested_at": now,
                "skills_manifest": skills_manifest,
            });
            match self
                .bridge
                .send_task(&target, CHECKIN_TASK_TYPE, payload, Route::Auto)
                .await
            {
                Ok(outcome) => results.push(CheckinResult {
                    target,
                    ok: true,
                    detail: serde_json::to_value(&outcome).unwrap_or_default(),
                }),
                Err(err) => results.push(CheckinResult {
                    target,
                    ok: false,
                    detail: json!({ "error": err.to_string() }),
                }),
            }
        }
        Ok(results)
    }
}
