//! Line-based markdown section splitting.
//!
//! Deliberately not AST-based: Phase 2 (extract) records line spans and
//! Phase 4 (update) replaces those exact spans later in the same run. An AST
//! round-trip would not guarantee the line numbers stay put.

use once_cell::sync::Lazy;
use regex::Regex;

static HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{2,})\s+(.+)$").unwrap());

/// A single `##+`-delimited region of a markdown file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub index: usize,
    pub title: String,
    pub level: usize,
    /// 1-indexed, inclusive.
    pub line_start: usize,
    /// 1-indexed, inclusive.
    pub line_end: usize,
    pub content: String,
}

/// Split `text` into sections headed by lines matching `^#{2,}\s+.+$`.
///
/// Trailing blank lines are trimmed from each section's span. Sections with
/// no non-whitespace content beyond the header are dropped. If the file has
/// no headers but has content, one synthetic section spanning the whole file
/// is returned, titled `fallback_title`.
pub fn split_sections(text: &str, fallback_title: &str) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut header_lines: Vec<(usize, usize, String)> = Vec::new(); // (0-idx line, level, title)
    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = HEADER_RE.captures(line) {
            let level = caps[1].len();
            let title = caps[2].trim().to_string();
            header_lines.push((i, level, title));
        }
    }

    if header_lines.is_empty() {
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![Section {
            index: 0,
            title: fallback_title.to_string(),
            level: 0,
            line_start: 1,
            line_end: lines.len(),
            content: text.trim_end().to_string(),
        }];
    }

    let mut sections = Vec::new();
    for (idx, &(start, level, ref title)) in header_lines.iter().enumerate() {
        let end_exclusive = header_lines
            .get(idx + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(lines.len());

        let mut end = end_exclusive;
        while end > start + 1 && lines[end - 1].trim().is_empty() {
            end -= 1;
        }

        let has_body = (start + 1..end).any(|i| !lines[i].trim().is_empty());
        if !has_body {
            continue;
        }

        let content = lines[start..end].join("\n");
        sections.push(Section {
            index: sections.len(),
            title: title.clone(),
            level,
            line_start: start + 1,
            line_end: end,
            content,
        });
    }

    sections
}
