// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Configuration for a haven node.
//!
//! Configuration is YAML (never TOML).  Three independent documents:
//!
//! - **Profile** (`config/profiles/<name>.yaml`) — the node's identity:
//!   display name, permitted tool tiers, health port, data directories.
//! - **Node directory** (`config/nodes.yaml`) — every peer in the
//!   federation plus the designated routing hub.
//! - **Skills manifest** (`<data>/skills/manifest.yaml`) — skills this
//!   node advertises to its peers.
//!
//! All loading errors are a [`ConfigError`] and fatal at startup; nothing
//! here is recovered silently.

mod nodes;
mod profile;
mod skills;

pub use nodes::{NodeDirectory, NodeEntry, PeerTarget};
pub use profile::{ensure_profile_directories, load_profile, Profile, ProfilePaths};
pub use skills::{SkillEntry, SkillManifest, SkillManifestDiff, SkillRemoval, SkillUpdate};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("invalid node directory: {0}")]
    InvalidNodeDirectory(String),

    #[error("invalid skills manifest: {0}")]
    InvalidSkillManifest(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        ConfigError::Io { path: path.display().to_string(), source }
    }

    pub(crate) fn yaml(path: &std::path::Path, source: serde_yaml::Error) -> Self {
        ConfigError::Yaml { path: path.display().to_string(), source }
    }
}
