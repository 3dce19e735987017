//! Exit persistence: one JSON document per scheduled exit.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

use vela_core::write_json_document;

use crate::exit::ScheduledExit;

/// Result of scanning the exit directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitScan {
    pub exits: Vec<ScheduledExit>,
    pub malformed_skipped: u64,
}

/// Directory-backed store. Each exit lives in `<dir>/<exit-id>.json`,
/// written atomically so the monitor never reads a half-written record.
pub struct ExitStore {
    dir: PathBuf,
}

impl ExitStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, exit_id: &str) -> PathBuf {
        self.dir.join(format!("{exit_id}.json"))
    }

    pub fn save(&self, exit: &ScheduledExit) -> Result<()> {
        write_json_document(&self.path_for(&exit.id), exit)
            .with_context(|| format!("failed to persist exit {}", exit.id))
    }

    pub fn load(&self, exit_id: &str) -> Result<Option<ScheduledExit>> {
        let path = self.path_for(exit_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let exit = serde_json::from_str(&raw)
            .with_context(|| format!("invalid exit document {}", path.display()))?;
        Ok(Some(exit))
    }

    /// Loads every parseable exit. A malformed document is logged and
    /// counted, never fatal: one corrupt file must not blind the monitor
    /// to every other user's exits.
    pub fn load_all(&self) -> Result<ExitScan> {
        if !self.dir.exists() {
            return Ok(ExitScan::default());
        }
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?;

        let mut scan = ExitScan::default();
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to list {}", self.dir.display()))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %path.display(), "unreadable exit document: {err}");
                    scan.malformed_skipped = scan.malformed_skipped.saturating_add(1);
                    continue;
                }
            };
            match serde_json::from_str::<ScheduledExit>(&raw) {
                Ok(exit) => scan.exits.push(exit),
                Err(err) => {
                    warn!(path = %path.display(), "malformed exit document: {err}");
                    scan.malformed_skipped = scan.malformed_skipped.saturating_add(1);
                }
            }
        }
        scan.exits
            .sort_by(|a, b| a.scheduled_at_unix_ms.cmp(&b.scheduled_at_unix_ms));
        Ok(scan)
    }
}
