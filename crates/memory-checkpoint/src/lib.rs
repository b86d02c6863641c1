//! Resumable checkpoint persistence.
//!
//! The checkpoint is a generic envelope around whatever run state the
//! orchestrator is accumulating (`memory-phase-api::RunState`); this crate
//! only owns the envelope fields (session bookkeeping, progress, workspace
//! identity) and the atomic save/load/archive mechanics.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;

pub const CHECKPOINT_VERSION: u32 = 1;
const TOTAL_PHASES: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub version: u32,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_phase: u32,
    pub completed_steps: Vec<String>,
    pub status: RunStatus,
    pub base_path: Utf8PathBuf,
    pub state: S,
}

impl<S> Checkpoint<S> {
    pub fn progress_percent(&self) -> u32 {
        (self.current_phase * 100) / TOTAL_PHASES
    }
}

/// Deterministic-enough session id generator: callers supply the current
/// time and a short random suffix (the orchestrator owns randomness so this
/// crate stays free of a `rand` dependency it would otherwise need only here).
pub fn generate_session_id(now: DateTime<Utc>, suffix: &str) -> String {
    format!("{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

pub struct CheckpointStore {
    path: Utf8PathBuf,
}

impl CheckpointStore {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn save<S: Serialize>(&self, checkpoint: &Checkpoint<S>) -> Result<()> {
        let json = serde_json::to_string_pretty(checkpoint)
            .context("failed to serialize checkpoint")?;
        memory_hash::write_atomic(&self.path, &json)
            .with_context(|| format!("failed to write checkpoint: {}", self.path))?;
        Ok(())
    }

    /// Load the checkpoint, rejecting it if its recorded `base_path` does
    /// not match `expected_base_path` (guards against resuming against the
    /// wrong workspace).
    pub fn load<S: for<'de> Deserialize<'de>>(
        &self,
        expected_base_path: &Utf8Path,
    ) -> Result<Option<Checkpoint<S>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .with_context(|| format!("failed to read checkpoint: {}", self.path))?;
        let checkpoint: Checkpoint<S> =
            serde_json::from_str(&content).context("failed to parse checkpoint")?;
        if checkpoint.base_path != expected_base_path {
            anyhow::bail!(
                "checkpoint base path mismatch: checkpoint is for {}, running against {}",
                checkpoint.base_path,
                expected_base_path
            );
        }
        Ok(Some(checkpoint))
    }

    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(self.path.as_std_path())
                .with_context(|| format!("failed to delete checkpoint: {}", self.path))?;
        }
        Ok(())
    }

    /// Rename the checkpoint to a timestamp-suffixed archive name.
    pub fn archive(&self, started_at: DateTime<Utc>) -> Result<Option<Utf8PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let parent = self.path.parent().unwrap_or_else(|| Utf8Path::new("."));
        let stamp = started_at.format("%Y%m%d%H%M%S");
        let archived = parent.join(format!("checkpoint_{stamp}.json"));
        fs::rename(self.path.as_std_path(), archived.as_std_path())
            .with_context(|| format!("failed to archive checkpoint to {archived}"))?;
        Ok(Some(archived))
    }
}
