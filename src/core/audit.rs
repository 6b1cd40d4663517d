//! Audit ledger: append-only record of every operation.
//!
//! One JSON object per line in `.state/audit.ndjson`. Entries are
//! self-contained, carry no back-pointers, and are only ever appended.
//! A torn final line (crash mid-append) is skipped on read, never fatal.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::DcpError;
use crate::core::time::now_iso;

pub const AUDIT_FILE: &str = "audit.ndjson";

/// One operation's summary, appended after the run completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub operation_id: String,
    pub operation_type: String,
    #[serde(default)]
    pub automation: String,
    pub status: String,
    #[serde(default)]
    pub actions_total: u32,
    #[serde(default)]
    pub actions_succeeded: u32,
    #[serde(default)]
    pub actions_failed: u32,
    #[serde(default)]
    pub modules_affected: Vec<String>,
    #[serde(default = "now_iso")]
    pub timestamp: String,
}

/// Append-only NDJSON writer/reader for audit entries.
///
/// Safe across process restarts; a single writer instance per process is
/// assumed (no cross-process locking).
#[derive(Debug, Clone)]
pub struct AuditLedger {
    path: PathBuf,
}

impl AuditLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_for_root(project_root: &Path) -> Self {
        Self::new(project_root.join(crate::core::state::STATE_DIR).join(AUDIT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush.
    pub fn write(&self, entry: &AuditEntry) -> Result<(), DcpError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(f, "{}", line)?;
        f.flush()?;
        Ok(())
    }

    /// The last `n` entries, oldest first. Unparseable lines are skipped
    /// with a warning so a truncated tail cannot poison the read.
    pub fn read_recent(&self, n: usize) -> Vec<AuditEntry> {
        let Ok(file) = std::fs::File::open(&self.path) else {
            return Vec::new();
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping unreadable audit line: {}", e),
            }
        }
        if entries.len() > n {
            entries.split_off(entries.len() - n)
        } else {
            entries
        }
    }

    /// Total number of lines in the ledger.
    pub fn entry_count(&self) -> usize {
        let Ok(file) = std::fs::File::open(&self.path) else {
            return 0;
        };
        BufReader::new(file).lines().map_while(Result::ok).count()
    }
}
