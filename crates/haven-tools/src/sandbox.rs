// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The per-profile sandbox — the only filesystem subtree file-touching
//! tools may see.
//!
//! [`Sandbox::resolve`] maps tool-supplied paths (relative or absolute)
//! to real paths and rejects anything that lands outside the sandbox
//! root, inside a protected location (`~/.ssh`), or inside another
//! profile's data directory.  Existing paths are canonicalized so a
//! symlink cannot smuggle a read outside the tree.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("path escapes sandbox: {0}")]
    Escape(String),

    #[error("path targets protected location: {0}")]
    Protected(String),

    #[error("path targets another profile: {0}")]
    ForeignProfile(String),

    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Sandbox {
    root: PathBuf,
    profile_data_root: PathBuf,
    home: PathBuf,
}

impl Sandbox {
    /// `root` is the profile's sandbox directory; `profile_data_root` its
    /// whole data directory (used for the cross-profile guard).
    pub fn new(root: &Path, profile_data_root: &Path) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
            profile_data_root: profile_data_root.to_path_buf(),
            home: dirs_home(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a tool-supplied path and guarantee it stays inside the
    /// sandbox.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, SandboxError> {
        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        // Canonicalize when possible (follows symlinks); fall back to a
        // lexical cleanup for paths that do not exist yet.
        let resolved = match joined.canonicalize() {
            Ok(p) => p,
            Err(_) => normalize_lexically(&joined),
        };
        self.assert_allowed(&resolved)?;
        Ok(resolved)
    }

    fn assert_allowed(&self, target: &Path) -> Result<(), SandboxError> {
        if !target.starts_with(&self.root) {
            return Err(SandboxError::Escape(target.display().to_string()));
        }
        for protected in [self.home.join(".ssh"), self.home.join(".gnupg")] {
            if target.starts_with(&protected) {
                return Err(SandboxError::Protected(target.display().to_string()));
            }
        }
        let agentdata_root = self.home.join("agentdata");
        if target.starts_with(&agentdata_root) && !target.starts_with(&self.profile_data_root) {
            return Err(SandboxError::ForeignProfile(target.display().to_string()));
        }
        Ok(())
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Strip `.` components and resolve `..` lexically, never climbing above
/// the filesystem root.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let tmp = tempfile::tempdir().unwrap();
        let data_root = tmp.path().join("agentdata/scarlet");
        let root = data_root.join("sandbox");
        let sb = Sandbox::new(&root, &data_root).unwrap();
        (tmp, sb)
    }

    #[test]
    fn relative_paths_resolve_inside_root() {
        let (_tmp, sb) = sandbox();
        let p = sb.resolve("notes/todo.txt").unwrap();
        assert!(p.starts_with(sb.root()));
    }

    #[test]
    fn dot_dot_escape_is_rejected() {
        let (_tmp, sb) = sandbox();
        assert!(matches!(
            sb.resolve("../../etc/passwd"),
            Err(SandboxError::Escape(_))
        ));
    }

    #[test]
    fn absolute_path_outside_root_is_rejected() {
        let (_tmp, sb) = sandbox();
        assert!(matches!(sb.resolve("/etc/passwd"), Err(SandboxError::Escape(_))));
    }

    #[test]
    fn absolute_path_inside_root_is_allowed() {
        let (_tmp, sb) = sandbox();
        let inside = sb.root().join("file.txt");
        let p = sb.resolve(inside.to_str().unwrap()).unwrap();
        assert!(p.starts_with(sb.root()));
    }

    #[test]
    fn symlink_escape_is_rejected() {
        #[cfg(unix)]
        {
            let (tmp, sb) = sandbox();
            let outside = tmp.path().join("outside.txt");
            std::fs::write(&outside, "secret").unwrap();
            let link = sb.root().join("sneaky");
            std::os::unix::fs::symlink(&outside, &link).unwrap();
            assert!(matches!(sb.resolve("sneaky"), Err(SandboxError::Escape(_))));
        }
    }

    #[test]
    fn normalize_handles_dots() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/./../c")),
            PathBuf::from("/a/c")
        );
    }
}
