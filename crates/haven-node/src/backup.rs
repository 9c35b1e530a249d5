// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Backup status — summarizes the cron-driven backup logs for
//! `GET /backup/status`.
//!
//! The backup jobs themselves live outside the node; they append one
//! line per run to `logs/backup_code.log` and `logs/backup_data.log`.
//! The last line is enough to tell healthy from broken.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

pub struct BackupStatus {
    logs_dir: PathBuf,
}

impl BackupStatus {
    pub fn new(logs_dir: &Path) -> Self {
        Self { logs_dir: logs_dir.to_path_buf() }
    }

    pub fn summary(&self) -> Value {
        json!({
            "code_backup": self.entry("backup_code.log"),
            "data_backup": self.entry("backup_data.log"),
        })
    }

    fn entry(&self, filename: &str) -> Value {
        let path = self.logs_dir.join(filename);
        let last_line = read_last_line(&path);
        json!({
            "log_path": path.display().to_string(),
            "status": entry_status(last_line.as_deref()),
            "last_line": last_line,
        })
    }
}

fn read_last_line(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    text.lines().last().map(str::to_string)
}

fn entry_status(last_line: Option<&str>) -> &'static str {
    match last_line {
        None => "missing",
        Some(line) => {
            let upper = line.to_uppercase();
            if upper.contains("ERROR") || upper.contains("FAILED") {
                "error"
            } else {
                "ok"
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
