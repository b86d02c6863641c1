//! Workspace scanning: finding dated daily logs and pulling hashtags out of them.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

static DATED_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:memory-)?(\d{4})-(\d{2})-(\d{2})\.md$").unwrap());

static HASHTAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([A-Za-z0-9_-]+)\b").unwrap());

/// A single occurrence of a validated hashtag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashtagOccurrence {
    pub tag: String,
    pub file: Utf8PathBuf,
    pub line: usize,
    pub context: String,
}

/// Recursively find markdown daily logs under `dir`.
///
/// Excludes generated subdirectories (`Topics`, `Archive`, the cache/report
/// dirs) and any directory starting with `.`. When both `start` and `end`
/// are given, files whose name matches the dated pattern are filtered to
/// that inclusive range; files without a parseable date are always included.
pub fn find_daily_logs(
    dir: &Utf8Path,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<Utf8PathBuf>> {
    let mut found = Vec::new();
    walk(dir, dir, &mut found)?;

    found.retain(|relative| {
        let name = relative.file_name().unwrap_or_default();
        match (start, end, parse_log_date(name)) {
            (Some(s), Some(e), Some(d)) => d >= s && d <= e,
            _ => true,
        }
    });

    found.sort();
    Ok(found)
}

fn walk(root: &Utf8Path, current: &Utf8Path, found: &mut Vec<Utf8PathBuf>) -> Result<()> {
    let entries = fs::read_dir(current.as_std_path())
        .with_context(|| format!("failed to read directory: {current}"))?;

    for entry in entries {
        let entry = entry.context("failed to read directory entry")?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|p| anyhow::anyhow!("non-UTF8 path: {}", p.display()))?;
        let file_type = entry.file_type().context("failed to stat directory entry")?;

        if file_type.is_dir() {
            let name = path.file_name().unwrap_or_default();
            if name.starts_with('.') || is_excluded_dir(name) {
                continue;
            }
            walk(root, &path, found)?;
        } else if file_type.is_file() && path.extension() == Some("md") {
            if let Ok(relative) = path.strip_prefix(root) {
                found.push(relative.to_path_buf());
            }
        }
    }

    Ok(())
}

fn is_excluded_dir(name: &str) -> bool {
    matches!(
        name,
        "Topics" | "topics" | "Archive" | "archive" | ".polish-cache" | ".polish-reports"
    )
}

fn parse_log_date(filename: &str) -> Option<NaiveDate> {
    let caps = DATED_NAME_RE.captures(filename)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Normalize and validate a raw `#tag` capture. Returns `None` for invalid
/// tags (all-numeric, or shouty all-caps source of length >= 8).
fn validate_tag(raw: &str) -> Option<String> {
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if raw.len() >= 8 && raw.chars().all(|c| !c.is_ascii_lowercase()) {
        return None;
    }
    let normalized = raw.to_lowercase();
    if !normalized.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return None;
    }
    if !normalized.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(normalized)
}

/// Extract every valid hashtag occurrence from `text`, attributed to `file`.
pub fn extract_hashtags(text: &str, file: &Utf8Path) -> Vec<HashtagOccurrence> {
    let mut occurrences = Vec::new();
    for (line_idx, line) in text.lines().enumerate() {
        for m in HASHTAG_RE.find_iter(line) {
            let raw = &line[m.start() + 1..m.end()];
            let Some(tag) = validate_tag(raw) else {
                continue;
            };
            let ctx_start = m.start().saturating_sub(20);
            let ctx_end = (m.end() + 20).min(line.len());
            occurrences.push(HashtagOccurrence {
                tag,
                file: file.to_path_buf(),
                line: line_idx + 1,
                context: line[ctx_start..ctx_end].to_string(),
            });
        }
    }
    occurrences
}

/// Per-tag frequency map built from a set of occurrences, filtered to a
/// minimum frequency.
pub fn tally(
    occurrences: &[HashtagOccurrence],
    min_frequency: usize,
) -> HashMap<String, Vec<HashtagOccurrence>> {
    let mut by_tag: HashMap<String, Vec<HashtagOccurrence>> = HashMap::new();
    for occ in occurrences {
        by_tag.entry(occ.tag.clone()).or_default().push(occ.clone());
    }
    by_tag.retain(|_, occs| occs.len() >= min_frequency);
    by_tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn validates_lowercase_and_rejects_numeric() {
        assert_eq!(validate_tag("trading"), Some("trading".to_string()));
        assert_eq!(validate_tag("123"), None);
        assert_eq!(validate_tag("Trading"), Some("trading".to_string()));
    }

    #[test]
    fn rejects_long_shouty_tags() {
        assert_eq!(validate_tag("TRADING1"), None);
        assert_eq!(validate_tag("IMPORTANT"), None);
    }

    #[test]
    fn accepts_short_all_caps() {
        assert_eq!(validate_tag("AI"), Some("ai".to_string()));
    }

    #[test]
    fn extract_hashtags_finds_and_filters() {
        let text = "Worked on #trading today, saw #123 in logs, and #TRADING again.";
        let occs = extract_hashtags(text, Utf8Path::new("memory-2026-01-01.md"));
        let tags: Vec<&str> = occs.iter().map(|o| o.tag.as_str()).collect();
        assert_eq!(tags, vec!["trading", "trading"]);
    }

    #[test]
    fn find_daily_logs_respects_date_range_and_exclusions() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        fs::write(root.join("memory-2026-01-01.md").as_std_path(), "x").unwrap();
        fs::write(root.join("memory-2026-02-01.md").as_std_path(), "x").unwrap();
        fs::create_dir_all(root.join("Topics").as_std_path()).unwrap();
        fs::write(root.join("Topics").join("trading.md").as_std_path(), "x").unwrap();

        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let found = find_daily_logs(&root, Some(start), Some(end)).unwrap();

        assert_eq!(found, vec![Utf8PathBuf::from("memory-2026-01-01.md")]);
    }
}
