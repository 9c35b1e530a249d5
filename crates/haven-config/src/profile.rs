// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Profile loading and per-profile path resolution.
//!
//! A profile is a single YAML file under `config/profiles/<name>.yaml`:
//!
//! ```yaml
//! name: scarlet
//! display_name: Scarlet
//! policy_tier: member
//! allowed_tool_tiers: [tier0, tier1]
//! health_port: 8600
//! llm_default_model: gpt-4o-mini
//! public_readonly_mode: false
//! public_readonly_get_endpoints: ["/health", "/status"]
//! ```
//!
//! Each profile owns a data directory under `$HOME/agentdata/<name>/`
//! holding the database, logs, secrets and the tool sandbox.  At most one
//! profile is active per process; the loaded [`Profile`] is immutable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

const DEFAULT_HEALTH_PORT: u16 = 8600;
const DEFAULT_MODEL: &str = "gpt-4o-mini";

fn default_health_port() -> u16 {
    DEFAULT_HEALTH_PORT
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_readonly_get_endpoints() -> Vec<String> {
    ["/health", "/status", "/api-usage", "/backup/status"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Resolved filesystem layout for one profile's data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePaths {
    pub base_data_dir: PathBuf,
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
    pub secrets_dir: PathBuf,
    pub sandbox_dir: PathBuf,
    pub skills_dir: PathBuf,
}

impl ProfilePaths {
    fn for_profile(profile_name: &str) -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agentdata")
            .join(profile_name);
        Self {
            db_path: base.join("memory.db"),
            logs_dir: base.join("logs"),
            secrets_dir: base.join("secrets"),
            sandbox_dir: base.join("sandbox"),
            skills_dir: base.join("skills"),
            base_data_dir: base,
        }
    }
}

/// On-disk profile schema.  Kept private: the validated [`Profile`] is the
/// public shape.
#[derive(Debug, Deserialize, Serialize)]
struct RawProfile {
    name: String,
    display_name: String,
    policy_tier: String,
    allowed_tool_tiers: Vec<String>,
    #[serde(default = "default_health_port")]
    health_port: u16,
    #[serde(default = "default_model")]
    llm_default_model: String,
    #[serde(default)]
    public_readonly_mode: bool,
    #[serde(default = "default_readonly_get_endpoints")]
    public_readonly_get_endpoints: Vec<String>,
    #[serde(default)]
    interop_identity_mode: Option<String>,
}

/// A node's identity and runtime settings, immutable after load.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub display_name: String,
    pub policy_tier: String,
    pub allowed_tool_tiers: Vec<String>,
    pub health_port: u16,
    pub llm_default_model: String,
    pub public_readonly_mode: bool,
    pub public_readonly_get_endpoints: Vec<String>,
    /// Identity verification mode to seed into the secrets dir on boot
    /// (`compat` when unset); the interop layer re-reads the secrets file.
    pub interop_identity_mode: Option<String>,
    pub paths: ProfilePaths,
}

/// Load and validate `config/profiles/<name>.yaml` under `repo_root`.
pub fn load_profile(profile_name: &str, repo_root: &Path) -> Result<Profile, ConfigError> {
    let profile_path = repo_root
        .join("config")
        .join("profiles")
        .join(format!("{profile_name}.yaml"));
    if !profile_path.exists() {
        return Err(ConfigError::ProfileNotFound(
            profile_path.display().to_string(),
        ));
    }

    let text = std::fs::read_to_string(&profile_path)
        .map_err(|e| ConfigError::io(&profile_path, e))?;
    let raw: RawProfile =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::yaml(&profile_path, e))?;

    if raw.name != profile_name {
        return Err(ConfigError::InvalidProfile(format!(
            "filename/name mismatch: expected '{profile_name}', got '{}'",
            raw.name
        )));
    }
    if raw.allowed_tool_tiers.is_empty() {
        return Err(ConfigError::InvalidProfile(
            "allowed_tool_tiers must be a non-empty list".to_string(),
        ));
    }

    let model = raw.llm_default_model.trim();
    Ok(Profile {
        paths: ProfilePaths::for_profile(&raw.name),
        name: raw.name,
        display_name: raw.display_name,
        policy_tier: raw.policy_tier,
        allowed_tool_tiers: raw.allowed_tool_tiers,
        health_port: raw.health_port,
        llm_default_model: if model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            model.to_string()
        },
        public_readonly_mode: raw.public_readonly_mode,
        public_readonly_get_endpoints: raw.public_readonly_get_endpoints,
        interop_identity_mode: raw.interop_identity_mode,
    })
}

/// Create the profile's data directories without touching existing data.
pub fn ensure_profile_directories(profile: &Profile) -> Result<(), ConfigError> {
    for dir in [
        &profile.paths.base_data_dir,
        &profile.paths.logs_dir,
        &profile.paths.secrets_dir,
        &profile.paths.sandbox_dir,
        &profile.paths.skills_dir,
    ] {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::io(dir, e))?;
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write_profile(root: &Path, name: &str, body: &str) {
        let dir = root.join("config").join("profiles");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{name}.yaml")), body).unwrap();
    }

    #[test]
    fn load_minimal_profile_applies_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        write_profile(
            tmp.path(),
            "scarlet",
            "name: scarlet\ndisplay_name: Scarlet\npolicy_tier: member\nallowed_tool_tiers: [tier0]\n",
        );
        let p = load_profile("scarlet", tmp.path()).unwrap();
        assert_eq!(p.health_port, 8600);
        assert_eq!(p.llm_default_model, "gpt-4o-mini");
        assert!(!p.public_readonly_mode);
        assert!(p.public_readonly_get_endpoints.contains(&"/health".to_string()));
    }

    #[test]
    fn missing_profile_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_profile("nobody", tmp.path()),
            Err(ConfigError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn name_mismatch_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_profile(
            tmp.path(),
            "scarlet",
            "name: somebody-else\ndisplay_name: X\npolicy_tier: member\nallowed_tool_tiers: [tier0]\n",
        );
        let err = load_profile("scarlet", tmp.path()).unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn empty_tier_list_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_profile(
            tmp.path(),
            "scarlet",
            "name: scarlet\ndisplay_name: X\npolicy_tier: member\nallowed_tool_tiers: []\n",
        );
        let err = load_profile("scarlet", tmp.path()).unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_profile(tmp.path(), "scarlet", "name: scarlet\n");
        assert!(load_profile("scarlet", tmp.path()).is_err());
    }

    #[test]
    fn blank_model_falls_back_to_default() {
        let tmp = tempfile::tempdir().unwrap();
        write_profile(
            tmp.path(),
            "scarlet",
            "name: scarlet\ndisplay_name: X\npolicy_tier: member\nallowed_tool_tiers: [tier0]\nllm_default_model: \"  \"\n",
        );
        let p = load_profile("scarlet", tmp.path()).unwrap();
        assert_eq!(p.llm_default_model, "gpt-4o-mini");
    }

    #[test]
    fn paths_are_rooted_under_agentdata() {
        let tmp = tempfile::tempdir().unwrap();
        write_profile(
            tmp.path(),
            "kiera",
            "name: kiera\ndisplay_name: Kiera\npolicy_tier: member\nallowed_tool_tiers: [tier0]\n",
        );
        let p = load_profile("kiera", tmp.path()).unwrap();
        assert!(p.paths.db_path.ends_with("agentdata/kiera/memory.db"));
        assert!(p.paths.sandbox_dir.ends_with("agentdata/kiera/sandbox"));
    }
}
