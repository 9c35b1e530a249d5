// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool-tier policy engine.
//!
//! Every tool declares a capability tier; every profile carries the set of
//! tiers it is allowed to use.  The engine maps `(tool, tier)` to one of
//! three decisions:
//!
//! | Tier | In profile's set | Decision |
//! |------|------------------|----------|
//! | T0   | yes              | allow    |
//! | T0   | no               | deny     |
//! | T1   | yes              | require_approval |
//! | T2   | yes              | require_approval |
//! | T1/T2| no               | deny     |
//!
//! T0 tools are free (read-only, local).  T1 tools need owner approval.
//! T2 tools need root approval.  The engine is stateless: it never talks
//! to the approval queue itself — callers enqueue on `RequireApproval`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unknown tool tier: {0}")]
    UnknownTier(String),
}

/// Capability class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolTier {
    /// Free: read-only, local, no approval needed.
    #[serde(rename = "tier0")]
    T0,
    /// Owner-approved: queued until the node owner approves.
    #[serde(rename = "tier1")]
    T1,
    /// Root-approved: queued until the fleet root approves.
    #[serde(rename = "tier2")]
    T2,
}

impl ToolTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolTier::T0 => "tier0",
            ToolTier::T1 => "tier1",
            ToolTier::T2 => "tier2",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        match raw.trim() {
            "tier0" => Ok(ToolTier::T0),
            "tier1" => Ok(ToolTier::T1),
            "tier2" => Ok(ToolTier::T2),
            other => Err(PolicyError::UnknownTier(other.to_string())),
        }
    }
}

/// Outcome of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    RequireApproval,
    Deny,
}

impl PolicyDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyDecision::Allow => "allow",
            PolicyDecision::RequireApproval => "require_approval",
            PolicyDecision::Deny => "deny",
        }
    }
}

/// A decision plus the human-readable reason that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub decision: PolicyDecision,
    pub reason: String,
}

impl PolicyVerdict {
    fn allow(reason: impl Into<String>) -> Self {
        Self { decision: PolicyDecision::Allow, reason: reason.into() }
    }
    fn require_approval(reason: impl Into<String>) -> Self {
        Self { decision: PolicyDecision::RequireApproval, reason: reason.into() }
    }
    fn deny(reason: impl Into<String>) -> Self {
        Self { decision: PolicyDecision::Deny, reason: reason.into() }
    }
}

/// Skill permissions that always need a human in the loop.
const RISKY_SKILL_PERMISSIONS: [&str; 4] = [
    "screen",
    "filesystem_write",
    "network_external",
    "secrets_access",
];

/// Evaluates whether a profile may run a tool of a given tier.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    allowed: BTreeSet<ToolTier>,
}

impl PolicyEngine {
    /// Build an engine from a profile's `allowed_tool_tiers` list.
    ///
    /// Unknown tier strings are a configuration error, not a silent deny.
    pub fn for_profile(allowed_tool_tiers: &[String]) -> Result<Self, PolicyError> {
        let mut allowed = BTreeSet::new();
        for raw in allowed_tool_tiers {
            allowed.insert(ToolTier::parse(raw)?);
        }
        Ok(Self { allowed })
    }

    pub fn from_tiers(tiers: impl IntoIterator<Item = ToolTier>) -> Self {
        Self { allowed: tiers.into_iter().collect() }
    }

    /// Map `(tool, tier)` to allow / require_approval / deny.
    pub fn check(&self, tool_name: &str, tier: ToolTier) -> PolicyVerdict {
        match tier {
            ToolTier::T0 => {
                if self.allowed.contains(&ToolTier::T0) {
                    PolicyVerdict::allow(format!("{tool_name} is T0 (free tier)"))
                } else {
                    PolicyVerdict::deny("T0 not permitted for this profile")
                }
            }
            ToolTier::T1 => {
                if self.allowed.contains(&ToolTier::T1) {
                    PolicyVerdict::require_approval(format!(
                        "{tool_name} requires owner approval (T1)"
                    ))
                } else {
                    PolicyVerdict::deny("T1 not permitted for this profile")
                }
            }
            ToolTier::T2 => {
                if self.allowed.contains(&ToolTier::T2) {
                    PolicyVerdict::require_approval(format!(
                        "{tool_name} requires root approval (T2)"
                    ))
                } else {
                    PolicyVerdict::deny("T2 not permitted for this profile")
                }
            }
        }
    }

    /// Screen a skill's requested permission set.
    ///
    /// Returns `RequireApproval` iff the request intersects the risky set,
    /// listing the offending permissions in the reason.
    pub fn check_skill_permissions(&self, requested: &[String]) -> PolicyVerdict {
        let mut risky_found: Vec<&str> = requested
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty() && RISKY_SKILL_PERMISSIONS.contains(p))
            .collect();
        risky_found.sort_unstable();
        risky_found.dedup();
        if risky_found.is_empty() {
            PolicyVerdict::allow("no risky skill permissions requested")
        } else {
            PolicyVerdict::require_approval(format!(
                "skill permissions require approval: {}",
                risky_found.join(", ")
            ))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
