// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The federation node directory (`config/nodes.yaml`).
//!
//! ```yaml
//! routing:
//!   hub_profile: jason
//! nodes:
//!   jason:
//!     host: hub.local
//!     profile: jason
//!     signing_public_key: "base64 of raw 32-byte Ed25519 public key"
//!   kiera:
//!     host: kiera.local
//!     profile: kiera
//!     user: kiera
//! ```
//!
//! A peer is *configured* iff its host is non-empty and does not end in
//! `.TBD` (the placeholder used while a machine is being provisioned).
//! The directory is small and read from disk on every use so edits take
//! effect without a restart.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// One `nodes:` entry as written in YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeEntry {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Base64 of the peer's raw 32-byte Ed25519 public key, if it signs
    /// envelopes with an identity key.
    #[serde(default)]
    pub signing_public_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct RoutingSection {
    #[serde(default)]
    hub_profile: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct RawDirectory {
    #[serde(default)]
    routing: RoutingSection,
    #[serde(default)]
    nodes: BTreeMap<String, NodeEntry>,
}

/// A configured, sendable peer resolved from the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTarget {
    pub node_id: String,
    pub profile: String,
    pub host: String,
}

/// Parsed view of `nodes.yaml`.
#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    hub_profile: Option<String>,
    nodes: BTreeMap<String, NodeEntry>,
}

impl NodeDirectory {
    /// Load the directory; a missing file is an empty directory, a
    /// malformed one is a [`ConfigError`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let raw: RawDirectory =
            serde_yaml::from_str(&text).map_err(|e| ConfigError::yaml(path, e))?;
        Ok(Self {
            hub_profile: raw
                .routing
                .hub_profile
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty()),
            nodes: raw.nodes,
        })
    }

    /// The profile designated to relay envelopes when direct delivery fails.
    pub fn hub_profile(&self) -> Option<&str> {
        self.hub_profile.as_deref()
    }

    /// Raw entries keyed by node id, in directory order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &NodeEntry)> {
        self.nodes.iter().map(|(id, e)| (id.as_str(), e))
    }

    fn profile_of(node_id: &str, entry: &NodeEntry) -> String {
        entry
            .profile
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(node_id)
            .to_string()
    }

    fn is_configured(entry: &NodeEntry) -> bool {
        let host = entry.host.trim();
        !host.is_empty() && !host.ends_with(".TBD")
    }

    /// Configured peers other than `local_profile`, keyed by profile name.
    pub fn configured_peers(&self, local_profile: &str) -> BTreeMap<String, PeerTarget> {
        let mut out = BTreeMap::new();
        for (node_id, entry) in &self.nodes {
            if !Self::is_configured(entry) {
                continue;
            }
            let profile = Self::profile_of(node_id, entry);
            if profile == local_profile {
                continue;
            }
            out.insert(
                profile.clone(),
                PeerTarget {
                    node_id: node_id.clone(),
                    profile,
                    host: entry.host.trim().to_string(),
                },
            );
        }
        out
    }

    /// Look up a configured peer by its profile name.
    pub fn peer(&self, profile: &str) -> Option<PeerTarget> {
        self.nodes.iter().find_map(|(node_id, entry)| {
            (Self::is_configured(entry) && Self::profile_of(node_id, entry) == profile).then(
                || PeerTarget {
                    node_id: node_id.clone(),
                    profile: profile.to_string(),
                    host: entry.host.trim().to_string(),
                },
            )
        })
    }

    /// The peer's identity public key (base64 raw bytes), if published.
    pub fn signing_public_key(&self, profile: &str) -> Option<String> {
        self.nodes.iter().find_map(|(node_id, entry)| {
            (Self::profile_of(node_id, entry) == profile)
                .then(|| entry.signing_public_key.clone())
                .flatten()
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
