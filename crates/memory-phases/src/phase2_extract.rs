use anyhow::{Context, Result};
use chrono::Duration;
use memory_phase_api::{Extraction, Phase, PhaseContext, PhaseId, PhaseMetadata, PhaseResult, RunState};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;

pub struct ExtractPhase;

static DATED_STEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:memory-)?(\d{4})-(\d{2})-(\d{2})$").unwrap());

impl Phase for ExtractPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Extract
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[PhaseId::Discover]
    }

    fn can_resume(&self) -> bool {
        true
    }

    fn run(&self, ctx: &PhaseContext, mut state: RunState) -> Result<PhaseResult> {
        let start = ctx.started_at.date_naive() - Duration::days(ctx.config.advanced.lookback_days as i64);
        let end = ctx.started_at.date_naive();
        let logs = memory_scanner::find_daily_logs(&ctx.memory_dir, Some(start), Some(end))
            .with_context(|| format!("failed to scan memory directory: {}", ctx.memory_dir))?;

        let extractions_dir = ctx.cache_dir().join("extractions");
        fs::create_dir_all(extractions_dir.as_std_path())
            .with_context(|| format!("failed to create extractions dir: {extractions_dir}"))?;

        for relative in &logs {
            let path = ctx.memory_dir.join(relative);
            let content = fs::read_to_string(path.as_std_path())
                .with_context(|| format!("failed to read {path}"))?;

            let stem = relative.file_stem().unwrap_or_default();
            let sections = memory_markdown::split_sections(&content, stem);

            for section in &sections {
                if is_polish_stub(&section.content) {
                    continue;
                }

                let occurrences = memory_scanner::extract_hashtags(&section.content, relative);
                let mut canonical_tags = Vec::new();
                for occ in &occurrences {
                    let canonical = state.canonical_map.resolve(&occ.tag);
                    if !canonical_tags.contains(&canonical) {
                        canonical_tags.push(canonical);
                    }
                }

                if canonical_tags.is_empty() {
                    continue;
                }

                let primary_topic = canonical_tags[0].clone();
                let secondary_topics = canonical_tags[1..].to_vec();
                let content_hash = memory_hash::hash_str(&section.content);
                let id = derive_extraction_id(stem, section.index);

                let extraction = Extraction {
                    id: id.clone(),
                    source_file: relative.clone(),
                    source_line_start: section.line_start,
                    source_line_end: section.line_end,
                    section_title: section.title.clone(),
                    primary_topic,
                    secondary_topics,
                    full_content: section.content.clone(),
                    content_hash,
                    extracted_at: ctx.started_at,
                };

                let json = serde_json::to_string_pretty(&extraction)
                    .context("failed to serialize extraction")?;
                memory_hash::write_atomic(&extractions_dir.join(format!("{id}.json")), &json)
                    .with_context(|| format!("failed to write extraction {id}"))?;

                state.stats.extractions_written += 1;
                state.extractions.push(extraction);
            }

            if !state.files_processed.contains(relative) {
                state.files_processed.push(relative.clone());
            }
        }

        Ok(PhaseResult {
            state,
            next_step: memory_phase_api::NextStep::Continue,
            metadata: PhaseMetadata::default(),
        })
    }
}

fn is_polish_stub(content: &str) -> bool {
    let mentions_topics = content.contains("Topics/") || content.contains("../Topics");
    (content.contains("→ **Polished to") || content.contains("→ **Primary:**")) && mentions_topics
}

/// `memory-YYYY-MM-DD.md`, section index N (0-based) -> `YYYYMMDD-NN` (1-based, zero-padded).
fn derive_extraction_id(stem: &str, section_index: usize) -> String {
    let date_part = DATED_STEM_RE
        .captures(stem)
        .map(|caps| format!("{}{}{}", &caps[1], &caps[2], &caps[3]))
        .unwrap_or_else(|| stem.to_string());
    format!("{date_part}-{:02}", section_index + 1)
}
