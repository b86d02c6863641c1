//! Layered configuration: built-in defaults, overridden by an optional
//! `<workspace>/.polish/config.toml`, overridden in turn by CLI flags (the
//! CLI layer lives in the root crate and mutates the resolved `RunConfig`
//! directly once this crate hands it one).

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;

const MAX_DISCOVERY_DEPTH: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Mechanical,
    Enhanced,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Mechanical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMethodConfig {
    Levenshtein,
    Embedding,
}

impl Default for SimilarityMethodConfig {
    fn default() -> Self {
        SimilarityMethodConfig::Levenshtein
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSimilarityConfig {
    pub method: SimilarityMethodConfig,
    pub threshold: f64,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
}

impl Default for TopicSimilarityConfig {
    fn default() -> Self {
        Self {
            method: SimilarityMethodConfig::default(),
            threshold: 0.8,
            model: None,
            dimensions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub lookback_days: u32,
    pub min_tag_frequency: usize,
    pub topics_directory: String,
    pub archive_directory: String,
    pub cache_directory: String,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            min_tag_frequency: 2,
            topics_directory: "Topics".to_string(),
            archive_directory: "Archive".to_string(),
            cache_directory: ".polish-cache".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub grace_period_days: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_period_days: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enable_checkpoints: bool,
    pub checkpoint_file: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enable_checkpoints: true,
            checkpoint_file: "checkpoint.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
    pub report_location: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            report_location: ".polish-reports".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub batch_size: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub auto_cleanup: bool,
    pub keep_session_cache_hours: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            auto_cleanup: false,
            keep_session_cache_hours: 72,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    pub execution_mode: ExecutionMode,
    pub topic_similarity: TopicSimilarityConfig,
    pub synonyms: Vec<Vec<String>>,
    pub advanced: AdvancedConfig,
    pub archive: ArchiveConfig,
    pub recovery: RecoveryConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub cleanup: CleanupConfig,
}

/// Load configuration for `workspace_root`: defaults, merged with
/// `<workspace_root>/.polish/config.toml` if present. CLI overrides are
/// applied by the caller after this returns.
pub fn load(workspace_root: &Utf8Path) -> Result<RunConfig> {
    let config_path = workspace_root.join(".polish").join("config.toml");
    if !config_path.exists() {
        tracing::debug!(path = %config_path, "no config file found, using built-in defaults");
        return Ok(RunConfig::default());
    }

    tracing::debug!(path = %config_path, "loading config file");
    let raw = fs::read_to_string(config_path.as_std_path())
        .with_context(|| format!("failed to read config file: {config_path}"))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config file: {config_path}"))
}

/// Walk up from `start` (inclusive) looking for a directory containing both
/// a sibling `AGENTS.md` and a `memory/` subdirectory, up to
/// `MAX_DISCOVERY_DEPTH` parents. Honors `MEMORY_DIR`/`OPENCLAW_WORKSPACE`
/// environment hints first.
pub fn discover_workspace(start: &Utf8Path, env: &dyn Fn(&str) -> Option<String>) -> Option<Utf8PathBuf> {
    if let Some(hint) = env("MEMORY_DIR").or_else(|| env("OPENCLAW_WORKSPACE")) {
        let hinted = Utf8PathBuf::from(hint);
        if hinted.join("memory").is_dir() {
            return Some(hinted);
        }
    }

    let mut current = start.to_path_buf();
    for _ in 0..=MAX_DISCOVERY_DEPTH {
        if current.join("AGENTS.md").is_file() && current.join("memory").is_dir() {
            return Some(current);
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.advanced.lookback_days, 7);
        assert_eq!(cfg.advanced.min_tag_frequency, 2);
        assert_eq!(cfg.topic_similarity.threshold, 0.8);
        assert_eq!(cfg.archive.grace_period_days, 3);
        assert_eq!(cfg.performance.batch_size, 10);
        assert_eq!(cfg.cleanup.keep_session_cache_hours, 72);
    }

    #[test]
    fn load_without_config_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let cfg = load(&root).unwrap();
        assert_eq!(cfg.advanced.lookback_days, 7);
    }

    #[test]
    fn load_merges_partial_config_file_over_defaults() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join(".polish").as_std_path()).unwrap();
        fs::write(
            root.join(".polish").join("config.toml").as_std_path(),
            "[advanced]\nlookback_days = 14\n",
        )
        .unwrap();

        let cfg = load(&root).unwrap();
        assert_eq!(cfg.advanced.lookback_days, 14);
        assert_eq!(cfg.advanced.min_tag_frequency, 2);
    }

    #[test]
    fn discover_workspace_walks_up_parents() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::write(root.join("AGENTS.md").as_std_path(), "x").unwrap();
        fs::create_dir_all(root.join("memory").as_std_path()).unwrap();

        let nested = root.join("a").join("b").join("c");
        fs::create_dir_all(nested.as_std_path()).unwrap();

        let found = discover_workspace(&nested, &|_| None).unwrap();
        assert_eq!(found, root);
    }

    #[test]
    fn discover_workspace_prefers_env_hint() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("memory").as_std_path()).unwrap();

        let root_clone = root.clone();
        let found = discover_workspace(Utf8Path::new("/nonexistent"), &move |key| {
            if key == "MEMORY_DIR" {
                Some(root_clone.to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(found, root);
    }
}
