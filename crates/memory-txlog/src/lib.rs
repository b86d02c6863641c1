//! Append-only transaction log.
//!
//! Every mutating step of a run appends one JSON object, one per line, to
//! `transaction.log`. Rollback walks the log in reverse and undoes
//! `replace_stubs` entries from their recorded pre-modification hash.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<Utf8PathBuf>,
    pub status: TxStatus,
}

/// Owns the single writer handle for a run's transaction log. The run is
/// single-threaded per phase, but the mutex keeps append ordering explicit
/// rather than implicit in call order.
pub struct TransactionLog {
    path: Utf8PathBuf,
    writer: Mutex<()>,
}

impl TransactionLog {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            writer: Mutex::new(()),
        }
    }

    pub fn append(&self, entry: &TransactionEntry) -> Result<()> {
        let _guard = self.writer.lock().expect("transaction log mutex poisoned");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create transaction log dir: {parent}"))?;
        }
        let line = serde_json::to_string(entry).context("failed to serialize transaction entry")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .with_context(|| format!("failed to open transaction log: {}", self.path))?;
        writeln!(file, "{line}").context("failed to append transaction entry")?;
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<TransactionEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .with_context(|| format!("failed to read transaction log: {}", self.path))?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("failed to parse transaction log entry"))
            .collect()
    }

    pub fn get_by_action<'a>(
        entries: &'a [TransactionEntry],
        action: &str,
    ) -> Vec<&'a TransactionEntry> {
        entries.iter().filter(|e| e.action == action).collect()
    }

    pub fn get_failed(entries: &[TransactionEntry]) -> Vec<&TransactionEntry> {
        entries.iter().filter(|e| e.status == TxStatus::Failed).collect()
    }

    pub fn get_reverse(entries: &[TransactionEntry]) -> Vec<&TransactionEntry> {
        entries.iter().rev().collect()
    }

    /// Rename the active log to a timestamp-suffixed archive name and leave
    /// a fresh empty log in its place.
    pub fn archive(&self, now: DateTime<Utc>) -> Result<Option<Utf8PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let parent = self.path.parent().unwrap_or_else(|| Utf8Path::new("."));
        let stamp = now.format("%Y%m%d%H%M%S");
        let archived = parent.join(format!("transaction_{stamp}.log"));
        fs::rename(self.path.as_std_path(), archived.as_std_path())
            .with_context(|| format!("failed to archive transaction log to {archived}"))?;
        Ok(Some(archived))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn entry(action: &str, status: TxStatus) -> TransactionEntry {
        TransactionEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            phase: "update".to_string(),
            action: action.to_string(),
            target: Some(Utf8PathBuf::from("memory-2026-01-01.md")),
            hash: Some("deadbeef".to_string()),
            source: None,
            destination: None,
            status,
        }
    }

    #[test]
    fn append_and_read_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("transaction.log")).unwrap();
        let log = TransactionLog::new(path);

        log.append(&entry("backup", TxStatus::Success)).unwrap();
        log.append(&entry("replace_stubs", TxStatus::Success)).unwrap();

        let entries = log.read().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, "replace_stubs");
    }

    #[test]
    fn get_reverse_undoes_in_reverse_order() {
        let entries = vec![
            entry("backup", TxStatus::Success),
            entry("replace_stubs", TxStatus::Success),
        ];
        let reversed = TransactionLog::get_reverse(&entries);
        assert_eq!(reversed[0].action, "replace_stubs");
        assert_eq!(reversed[1].action, "backup");
    }

    #[test]
    fn get_failed_filters_status() {
        let entries = vec![
            entry("backup", TxStatus::Success),
            entry("replace_stubs", TxStatus::Failed),
        ];
        assert_eq!(TransactionLog::get_failed(&entries).len(), 1);
    }

    #[test]
    fn archive_renames_and_clears() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("transaction.log")).unwrap();
        let log = TransactionLog::new(path.clone());
        log.append(&entry("backup", TxStatus::Success)).unwrap();

        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let archived = log.archive(now).unwrap().unwrap();

        assert!(archived.to_string().contains("transaction_20260102030405.log"));
        assert!(!path.exists());
    }
}
