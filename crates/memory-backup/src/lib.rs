//! Content-addressed backup store.
//!
//! Every file about to be modified is copied into `backups/<sha256>.md`
//! first. Because the name is the hash, two daily logs with identical
//! content share a single backup record, and re-running Phase 0 against an
//! already-backed-up file is a no-op.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use std::fs;
use std::time::SystemTime;

pub struct BackupStore {
    dir: Utf8PathBuf,
}

impl BackupStore {
    pub fn new(dir: Utf8PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, hash: &str) -> Utf8PathBuf {
        self.dir.join(format!("{hash}.md"))
    }

    /// Create a backup record for `content`, returning its path. Idempotent:
    /// an existing record with the same hash is left untouched.
    pub fn create(&self, content: &str, hash: Option<&str>) -> Result<Utf8PathBuf> {
        let hash = match hash {
            Some(h) => h.to_string(),
            None => memory_hash::hash_str(content),
        };
        let target = self.path_for(&hash);
        if target.exists() {
            return Ok(target);
        }
        memory_hash::write_atomic(&target, content)
            .with_context(|| format!("failed to write backup: {target}"))?;
        Ok(target)
    }

    pub fn has(&self, hash: &str) -> bool {
        self.path_for(hash).exists()
    }

    /// Restore the content addressed by `hash` to `target`.
    pub fn restore(&self, hash: &str, target: &Utf8Path) -> Result<()> {
        let backup_path = self.path_for(hash);
        let content = fs::read_to_string(backup_path.as_std_path())
            .with_context(|| format!("backup not found for hash: {hash}"))?;
        memory_hash::write_atomic(target, &content)
            .with_context(|| format!("failed to restore {target} from backup {hash}"))
            .map(|_| ())
    }

    /// Delete backup records older than `max_age_hours`. Returns the count removed.
    pub fn clean_old(&self, max_age_hours: u64) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let cutoff = SystemTime::now() - std::time::Duration::from_secs(max_age_hours * 3600);
        let mut removed = 0;
        for entry in fs::read_dir(self.dir.as_std_path())
            .with_context(|| format!("failed to read backup dir: {}", self.dir))?
        {
            let entry = entry?;
            let modified = entry.metadata()?.modified()?;
            if modified < cutoff {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn last_modified(&self, hash: &str) -> Result<DateTime<Utc>> {
        let meta = fs::metadata(self.path_for(hash).as_std_path())?;
        Ok(DateTime::<Utc>::from(meta.modified()?))
    }
}
