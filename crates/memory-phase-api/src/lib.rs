//! Shared types for the six-phase pipeline: the `Phase` trait, the
//! orchestrator context, and the accumulated run state that flows from one
//! phase to the next and gets checkpointed between them.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use memory_backup::BackupStore;
use memory_config::RunConfig;
use memory_scanner::HashtagOccurrence;
use memory_similarity::MergeProposal;
use memory_txlog::TransactionLog;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    Init,
    Discover,
    Extract,
    Organize,
    Update,
    Validate,
    Resume,
}

impl PhaseId {
    /// 0-based ordinal used for checkpoint progress (`Resume` decides
    /// before the numbered phases run, so it has no ordinal of its own).
    pub fn ordinal(self) -> u32 {
        match self {
            PhaseId::Init => 0,
            PhaseId::Discover => 1,
            PhaseId::Extract => 2,
            PhaseId::Organize => 3,
            PhaseId::Update => 4,
            PhaseId::Validate => 5,
            PhaseId::Resume => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    Continue,
    Rewind { to: PhaseId },
    Complete,
    Rollback,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicFrequency {
    pub count: usize,
    pub occurrences: Vec<HashtagOccurrence>,
}

pub type DiscoveredTopics = HashMap<String, TopicFrequency>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalEntry {
    pub canonical: String,
    pub aliases: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalMap {
    pub canonical_map: HashMap<String, CanonicalEntry>,
    pub alias_map: HashMap<String, String>,
}

impl CanonicalMap {
    /// Resolve a (possibly aliased) tag to its canonical form.
    pub fn resolve(&self, tag: &str) -> String {
        self.alias_map
            .get(tag)
            .cloned()
            .unwrap_or_else(|| tag.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub id: String,
    pub source_file: Utf8PathBuf,
    pub source_line_start: usize,
    pub source_line_end: usize,
    pub section_title: String,
    pub primary_topic: String,
    pub secondary_topics: Vec<String>,
    pub full_content: String,
    pub content_hash: String,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub files_scanned: usize,
    pub tags_discovered: usize,
    pub merges_applied: usize,
    pub extractions_written: usize,
    pub entries_written: usize,
    pub cross_refs_created: usize,
    pub files_archived: usize,
    pub backups_created: usize,
}

/// The state accumulated across phases and persisted in the checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub discovered_topics: DiscoveredTopics,
    pub merge_proposals: Vec<MergeProposal>,
    pub canonical_map: CanonicalMap,
    pub extractions: Vec<Extraction>,
    pub files_processed: Vec<Utf8PathBuf>,
    pub similarity_method: String,
    pub stats: RunStats,
}

/// Everything a phase needs to do its work, resolved once at orchestrator
/// startup.
#[derive(Clone)]
pub struct PhaseContext {
    pub workspace_root: Utf8PathBuf,
    pub memory_dir: Utf8PathBuf,
    pub config: RunConfig,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub backups: Arc<BackupStore>,
    pub transaction_log: Arc<TransactionLog>,
}

impl PhaseContext {
    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.memory_dir.join(&self.config.advanced.cache_directory)
    }

    pub fn topics_dir(&self) -> Utf8PathBuf {
        self.memory_dir.join(&self.config.advanced.topics_directory)
    }

    pub fn archive_dir(&self) -> Utf8PathBuf {
        self.memory_dir.join(&self.config.advanced.archive_directory)
    }

    pub fn reports_dir(&self) -> Utf8PathBuf {
        self.memory_dir.join(&self.config.logging.report_location)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhaseMetadata {
    pub duration_ms: Option<u64>,
}

pub struct PhaseResult {
    pub state: RunState,
    pub next_step: NextStep,
    pub metadata: PhaseMetadata,
}

/// A step in the discover -> extract -> organize -> update -> validate
/// pipeline. `Resume` (phase 6) implements this trait too, but runs before
/// the others to decide whether this is a fresh run or a continuation.
pub trait Phase {
    fn id(&self) -> PhaseId;
    fn deps(&self) -> &'static [PhaseId];
    fn can_resume(&self) -> bool;
    fn run(&self, ctx: &PhaseContext, state: RunState) -> anyhow::Result<PhaseResult>;
}

/// A phase failure that carries enough information for the orchestrator to
/// pick the right `PolishError` variant (and exit code) without having to
/// guess from a free-text message. Phases that hit something other than a
/// plain I/O failure should return this (via `anyhow::Error::from`) instead
/// of a bare `anyhow::bail!`.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("security violation: {0}")]
    Security(String),

    #[error("content integrity check failed: {0}")]
    Integrity(String),
}

impl PhaseError {
    pub fn security(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(PhaseError::Security(message.into()))
    }

    pub fn integrity(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(PhaseError::Integrity(message.into()))
    }
}
