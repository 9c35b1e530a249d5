// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Skills manifest — the list of skills a node advertises to its peers.
//!
//! The manifest is a YAML file (`skills: [...]`) created empty on first
//! use.  Entries are validated on upsert; `diff` compares a remote
//! node's manifest against ours by version and checksum, which is how
//! the daily check-in exchange spots new or updated skills.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// One advertised skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillEntry {
    pub skill_id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub entrypoints: Vec<String>,
    pub dependencies: Vec<String>,
    pub permissions_requested: Vec<String>,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_by: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    skills: Vec<SkillEntry>,
}

/// Result of comparing a remote manifest against the local one.
#[derive(Debug, Default, Serialize)]
pub struct SkillManifestDiff {
    pub added: Vec<SkillEntry>,
    pub updated: Vec<SkillUpdate>,
    pub removed: Vec<SkillRemoval>,
}

#[derive(Debug, Serialize)]
pub struct SkillUpdate {
    pub skill_id: String,
    pub from_version: String,
    pub to_version: String,
}

#[derive(Debug, Serialize)]
pub struct SkillRemoval {
    pub skill_id: String,
    pub version: String,
}

/// Loads and edits the on-disk skills manifest.
#[derive(Debug, Clone)]
pub struct SkillManifest {
    path: PathBuf,
}

impl SkillManifest {
    /// Open the manifest, creating an empty `skills: []` file if absent.
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }
        if !path.exists() {
            std::fs::write(path, "skills: []\n").map_err(|e| ConfigError::io(path, e))?;
        }
        Ok(Self { path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<SkillEntry>, ConfigError> {
        let text =
            std::fs::read_to_string(&self.path).map_err(|e| ConfigError::io(&self.path, e))?;
        let file: ManifestFile =
            serde_yaml::from_str(&text).map_err(|e| ConfigError::yaml(&self.path, e))?;
        Ok(file.skills)
    }

    fn save(&self, skills: Vec<SkillEntry>) -> Result<(), ConfigError> {
        let text = serde_yaml::to_string(&ManifestFile { skills })
            .map_err(|e| ConfigError::yaml(&self.path, e))?;
        std::fs::write(&self.path, text).map_err(|e| ConfigError::io(&self.path, e))
    }

    /// Sorted skill ids, the list advertised in check-in envelopes.
    pub fn list_ids(&self) -> Result<Vec<String>, ConfigError> {
        let mut ids: Vec<String> = self
            .load()?
            .into_iter()
            .map(|s| s.skill_id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Insert or replace the entry with the same `skill_id`.
    pub fn upsert(&self, skill: SkillEntry) -> Result<(), ConfigError> {
        if skill.skill_id.trim().is_empty() {
            return Err(ConfigError::InvalidSkillManifest(
                "skill_id must be non-empty".to_string(),
            ));
        }
        let mut skills = self.load()?;
        match skills.iter_mut().find(|s| s.skill_id == skill.skill_id) {
            Some(slot) => *slot = skill,
            None => skills.push(skill),
        }
        self.save(skills)
    }

    /// Compare a remote manifest against ours.
    pub fn diff(&self, remote: &[SkillEntry]) -> Result<SkillManifestDiff, ConfigError> {
        let local = self.load()?;
        let mut out = SkillManifestDiff::default();
        for remote_skill in remote {
            match local.iter().find(|l| l.skill_id == remote_skill.skill_id) {
                None => out.added.push(remote_skill.clone()),
                Some(local_skill) => {
                    if local_skill.version != remote_skill.version
                        || local_skill.checksum != remote_skill.checksum
                    {
                        out.updated.push(SkillUpdate {
                            skill_id: remote_skill.skill_id.clone(),
                            from_version: local_skill.version.clone(),
                            to_version: remote_skill.version.clone(),
                        });
                    }
                }
            }
        }
        for local_skill in &local {
            if !remote.iter().any(|r| r.skill_id == local_skill.skill_id) {
                out.removed.push(SkillRemoval {
                    skill_id: local_skill.skill_id.clone(),
                    version: local_skill.version.clone(),
                });
            }
        }
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, version: &str, checksum: &str) -> SkillEntry {
        SkillEntry {
            skill_id: id.to_string(),
            name: id.to_string(),
            version: version.to_string(),
            description: "test skill".to_string(),
            entrypoints: vec!["run.sh".to_string()],
            dependencies: vec![],
            permissions_requested: vec![],
            checksum: checksum.to_string(),
            signed_by: None,
        }
    }

    fn manifest() -> (tempfile::TempDir, SkillManifest) {
        let tmp = tempfile::tempdir().unwrap();
        let m = SkillManifest::open(&tmp.path().join("skills/manifest.yaml")).unwrap();
        (tmp, m)
    }

    #[test]
    fn open_creates_empty_manifest() {
        let (_tmp, m) = manifest();
        assert!(m.load().unwrap().is_empty());
        assert!(m.list_ids().unwrap().is_empty());
    }

    #[test]
    fn upsert_inserts_then_replaces() {
        let (_tmp, m) = manifest();
        m.upsert(entry("speak", "1.0", "aa")).unwrap();
        m.upsert(entry("speak", "1.1", "bb")).unwrap();
        let skills = m.load().unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].version, "1.1");
    }

    #[test]
    fn upsert_rejects_blank_id() {
        let (_tmp, m) = manifest();
        assert!(m.upsert(entry("  ", "1.0", "aa")).is_err());
    }

    #[test]
    fn list_ids_is_sorted() {
        let (_tmp, m) = manifest();
        m.upsert(entry("zeta", "1", "a")).unwrap();
        m.upsert(entry("alpha", "1", "b")).unwrap();
        assert_eq!(m.list_ids().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn diff_reports_added_updated_removed() {
        let (_tmp, m) = manifest();
        m.upsert(entry("keep", "1.0", "aa")).unwrap();
        m.upsert(entry("old", "1.0", "aa")).unwrap();
        m.upsert(entry("bump", "1.0", "aa")).unwrap();

        let remote = vec![
            entry("keep", "1.0", "aa"),
            entry("bump", "2.0", "cc"),
            entry("fresh", "0.1", "dd"),
        ];
        let diff = m.diff(&remote).unwrap();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].skill_id, "fresh");
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0].skill_id, "bump");
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].skill_id, "old");
    }

    #[test]
    fn checksum_change_alone_counts_as_update() {
        let (_tmp, m) = manifest();
        m.upsert(entry("skill", "1.0", "aa")).unwrap();
        let diff = m.diff(&[entry("skill", "1.0", "bb")]).unwrap();
        assert_eq!(diff.updated.len(), 1);
    }
}
