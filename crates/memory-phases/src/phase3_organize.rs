use crate::sanitize_topic_name;
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use memory_phase_api::{Extraction, Phase, PhaseContext, PhaseId, PhaseMetadata, PhaseResult, RunState};
use memory_similarity::MergeProposal;
use std::fs;

pub struct OrganizePhase;

impl Phase for OrganizePhase {
    fn id(&self) -> PhaseId {
        PhaseId::Organize
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[PhaseId::Extract]
    }

    fn can_resume(&self) -> bool {
        true
    }

    fn run(&self, ctx: &PhaseContext, mut state: RunState) -> Result<PhaseResult> {
        let topics_dir = ctx.topics_dir();
        fs::create_dir_all(topics_dir.as_std_path())
            .with_context(|| format!("failed to create topics dir: {topics_dir}"))?;

        let extractions = state.extractions.clone();
        for extraction in &extractions {
            write_entry(ctx, &topics_dir, extraction, true, &extraction.primary_topic)?;
            state.stats.entries_written += 1;

            for secondary in &extraction.secondary_topics {
                write_entry(ctx, &topics_dir, extraction, false, secondary)?;
                state.stats.cross_refs_created += 1;
            }
        }

        let proposals = state.merge_proposals.clone();
        for proposal in &proposals {
            if apply_merge(ctx, &topics_dir, proposal)? {
                state.stats.merges_applied += 1;
            }
        }

        Ok(PhaseResult {
            state,
            next_step: memory_phase_api::NextStep::Continue,
            metadata: PhaseMetadata::default(),
        })
    }
}

fn resolve_topic_path(topics_dir: &camino::Utf8Path, topic: &str) -> Result<Utf8PathBuf> {
    let name = sanitize_topic_name(topic);
    let target = topics_dir.join(format!("{name}.md"));
    let target_str = target.as_str();
    let topics_str = topics_dir.as_str();
    if !target_str.starts_with(topics_str) {
        return Err(memory_phase_api::PhaseError::security(
            "resolved topic path escapes topics directory",
        ));
    }
    Ok(target)
}

fn write_entry(
    ctx: &PhaseContext,
    topics_dir: &camino::Utf8Path,
    extraction: &Extraction,
    is_primary: bool,
    topic: &str,
) -> Result<()> {
    let path = resolve_topic_path(topics_dir, topic)?;
    let date = ctx.started_at.format("%Y-%m-%d");

    let entry = if is_primary {
        let mut tags = vec![format!("#{}", extraction.primary_topic)];
        tags.extend(extraction.secondary_topics.iter().map(|t| format!("#{t}")));
        format!(
            "### {date} — [{src}](../{src}#L{start})\n\n{content}\n\n**Topics:** {tags}\n**Source:** {src} (lines {start}-{end})\n**Hash:** {hash}\n\n---\n",
            date = date,
            src = extraction.source_file,
            start = extraction.source_line_start,
            end = extraction.source_line_end,
            content = extraction.full_content,
            tags = tags.join(" "),
            hash = extraction.content_hash,
        )
    } else {
        let preview: String = extraction
            .full_content
            .chars()
            .filter(|c| *c != '\n')
            .take(100)
            .collect();
        let primary_name = sanitize_topic_name(&extraction.primary_topic);
        let mut tags = vec![format!("#{}", extraction.primary_topic)];
        tags.extend(extraction.secondary_topics.iter().map(|t| format!("#{t}")));
        format!(
            "### {date} — Cross-Reference\n\n📌 **Full entry:** [Topics/{primary}.md]({primary}.md#{date})\n\n**Preview:** {preview}...\n\n**Tags:** {tags}\n**Related File:** {src}\n\n---\n",
            date = date,
            primary = primary_name,
            preview = preview,
            tags = tags.join(" "),
            src = extraction.source_file,
        )
    };

    append_or_create(ctx, &path, topic, &entry)
}

fn append_or_create(ctx: &PhaseContext, path: &Utf8PathBuf, topic: &str, entry: &str) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path.as_std_path())
            .with_context(|| format!("failed to read topic file: {path}"))?
    } else {
        header(ctx, topic)
    };
    let updated = format!("{existing}\n{entry}");
    memory_hash::write_atomic(path, &updated)
        .with_context(|| format!("failed to write topic file: {path}"))
        .map(|_| ())
}

fn header(ctx: &PhaseContext, topic: &str) -> String {
    let title = sanitize_topic_name(topic);
    let date = ctx.started_at.format("%Y-%m-%d");
    format!("# {title}\n\n**Topic:** #{topic}\n**Curated:** {date}\n\n---\n")
}

/// Apply one merge proposal: fold the alias topic file's new entries into
/// the canonical file, rewrite `#alias` to `#canonical`, and archive the
/// alias file. Returns `true` if a merge actually happened.
fn apply_merge(
    ctx: &PhaseContext,
    topics_dir: &camino::Utf8Path,
    proposal: &MergeProposal,
) -> Result<bool> {
    let alias_path = resolve_topic_path(topics_dir, &proposal.alias)?;
    if !alias_path.exists() {
        return Ok(false);
    }
    let canonical_path = resolve_topic_path(topics_dir, &proposal.canonical)?;

    let alias_content = fs::read_to_string(alias_path.as_std_path())
        .with_context(|| format!("failed to read alias topic file: {alias_path}"))?;
    let canonical_content = if canonical_path.exists() {
        fs::read_to_string(canonical_path.as_std_path())
            .with_context(|| format!("failed to read canonical topic file: {canonical_path}"))?
    } else {
        header(ctx, &proposal.canonical)
    };

    let existing_hashes: Vec<&str> = canonical_content
        .lines()
        .filter_map(|l| l.strip_prefix("**Hash:** "))
        .collect();

    let entries: Vec<&str> = alias_content.split("\n---\n").collect();
    let mut appended = String::new();
    for entry in &entries {
        if entry.trim().is_empty() || entry.starts_with('#') {
            continue; // header/quote block, not a dated entry
        }
        let entry_hash = entry.lines().find_map(|l| l.strip_prefix("**Hash:** "));
        if let Some(hash) = entry_hash {
            if existing_hashes.contains(&hash) {
                continue;
            }
        }
        let rewritten = entry.replace(&format!("#{}", proposal.alias), &format!("#{}", proposal.canonical));
        appended.push_str(rewritten.trim_end());
        appended.push_str("\n\n---\n");
    }

    if !appended.is_empty() {
        let merged = format!("{canonical_content}\n{appended}");
        memory_hash::write_atomic(&canonical_path, &merged)
            .with_context(|| format!("failed to write merged canonical file: {canonical_path}"))?;
    }

    let archive_dir = topics_dir.join(".archive");
    fs::create_dir_all(archive_dir.as_std_path())
        .with_context(|| format!("failed to create topics archive dir: {archive_dir}"))?;
    let alias_stem = sanitize_topic_name(&proposal.alias);
    let date = ctx.started_at.format("%Y-%m-%d");
    let archived_path = archive_dir.join(format!("{alias_stem}_merged_{date}.md"));
    let banner = format!(
        "<!-- merged into {} on {} — confidence {:.2} -->\n\n",
        proposal.canonical, date, proposal.confidence
    );
    memory_hash::write_atomic(&archived_path, &format!("{banner}{alias_content}"))
        .with_context(|| format!("failed to archive merged alias file: {archived_path}"))?;
    fs::remove_file(alias_path.as_std_path())
        .with_context(|| format!("failed to remove merged alias file: {alias_path}"))?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;

    #[test]
    fn resolve_topic_path_rejects_traversal() {
        let topics = Utf8Path::new("/workspace/memory/Topics");
        let resolved = resolve_topic_path(topics, "../../../etc/passwd").unwrap();
        assert!(resolved.as_str().starts_with(topics.as_str()));
    }
}
