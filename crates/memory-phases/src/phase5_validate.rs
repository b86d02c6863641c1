use anyhow::{Context, Result};
use memory_phase_api::{Phase, PhaseContext, PhaseId, PhaseMetadata, PhaseResult, RunState};
use memory_txlog::TxStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;

pub struct ValidatePhase;

#[derive(Debug, Default, Clone)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\]\(([^)#]+)(?:#[^)]*)?\)").unwrap());

impl Phase for ValidatePhase {
    fn id(&self) -> PhaseId {
        PhaseId::Validate
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[PhaseId::Update]
    }

    fn can_resume(&self) -> bool {
        true
    }

    fn run(&self, ctx: &PhaseContext, state: RunState) -> Result<PhaseResult> {
        let report = validate(ctx, &state)?;

        let next_step = if report.errors.is_empty() {
            write_report(ctx, &state, &report, false)?;
            memory_phase_api::NextStep::Complete
        } else {
            for err in &report.errors {
                tracing::error!(error = %err, "validation failure, rolling back");
            }
            rollback(ctx)?;
            write_report(ctx, &state, &report, true)?;
            memory_phase_api::NextStep::Rollback
        };

        Ok(PhaseResult {
            state,
            next_step,
            metadata: PhaseMetadata::default(),
        })
    }
}

fn validate(ctx: &PhaseContext, state: &RunState) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let topics_dir = ctx.topics_dir();

    // 1. Content integrity.
    for extraction in &state.extractions {
        let path = topics_dir.join(format!(
            "{}.md",
            crate::sanitize_topic_name(&extraction.primary_topic)
        ));
        match fs::read_to_string(path.as_std_path()) {
            Ok(content) if content.contains(&extraction.content_hash) => {}
            Ok(_) => report.errors.push(format!(
                "topic file {path} is missing hash {} for extraction {}",
                extraction.content_hash, extraction.id
            )),
            Err(_) => report
                .errors
                .push(format!("topic file missing for extraction {}: {path}", extraction.id)),
        }
    }

    // 2. Link integrity.
    if topics_dir.is_dir() {
        for entry in fs::read_dir(topics_dir.as_std_path())
            .with_context(|| format!("failed to read topics dir: {topics_dir}"))?
        {
            let entry = entry?;
            let path = camino::Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|p| anyhow::anyhow!("non-UTF8 path: {}", p.display()))?;
            if path.extension() != Some("md") {
                continue;
            }
            let content = fs::read_to_string(path.as_std_path())
                .with_context(|| format!("failed to read topic file: {path}"))?;
            for caps in LINK_RE.captures_iter(&content) {
                let target = &caps[1];
                if target.starts_with("http://") || target.starts_with("https://") {
                    continue;
                }
                let resolved = topics_dir.join(target);
                if !resolved.exists() && !ctx.memory_dir.join(target).exists() {
                    report
                        .errors
                        .push(format!("broken link in {path}: {target}"));
                }
            }
        }
    }

    // 3. Merge integrity.
    for proposal in &state.merge_proposals {
        let alias_stem = crate::sanitize_topic_name(&proposal.alias);
        let archive_glob_dir = topics_dir.join(".archive");
        let expected_prefix = format!("{alias_stem}_merged_");
        let found = archive_glob_dir
            .is_dir()
            .then(|| {
                fs::read_dir(archive_glob_dir.as_std_path())
                    .ok()
                    .map(|entries| {
                        entries.filter_map(|e| e.ok()).any(|e| {
                            e.file_name()
                                .to_string_lossy()
                                .starts_with(&expected_prefix)
                        })
                    })
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        if !found {
            report.warnings.push(format!(
                "no merge archive found for alias {} -> {}",
                proposal.alias, proposal.canonical
            ));
        }
    }

    // 4. Filesystem health.
    if topics_dir.is_dir() {
        for entry in fs::read_dir(topics_dir.as_std_path())
            .with_context(|| format!("failed to read topics dir: {topics_dir}"))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let path = camino::Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|p| anyhow::anyhow!("non-UTF8 path: {}", p.display()))?;
            let content = fs::read_to_string(path.as_std_path())
                .with_context(|| format!("failed to read topic file: {path}"))?;

            if content.is_empty() {
                report.errors.push(format!("topic file is empty: {path}"));
            } else if content.len() < 100 {
                report.warnings.push(format!("topic file suspiciously short: {path}"));
            }
            if content.contains("undefined") || content.contains("[object Object]") {
                report.errors.push(format!("topic file contains a rendering artifact: {path}"));
            }
        }
    }

    Ok(report)
}

fn write_report(
    ctx: &PhaseContext,
    state: &RunState,
    report: &ValidationReport,
    rolled_back: bool,
) -> Result<()> {
    let date = ctx.started_at.format("%Y-%m-%d");
    let name = if rolled_back {
        format!("rollback-{date}.md")
    } else {
        format!("session-{date}.md")
    };

    let body = format!(
        "# Polish Report — {date}\n\n**Session:** {session}\n**Files scanned:** {scanned}\n**Tags discovered:** {tags}\n**Extractions written:** {extractions}\n**Merges applied:** {merges}\n**Files archived:** {archived}\n\n## Warnings\n{warnings}\n\n## Errors\n{errors}\n",
        session = ctx.session_id,
        scanned = state.stats.files_scanned,
        tags = state.stats.tags_discovered,
        extractions = state.stats.extractions_written,
        merges = state.stats.merges_applied,
        archived = state.stats.files_archived,
        warnings = if report.warnings.is_empty() {
            "none".to_string()
        } else {
            report.warnings.join("\n")
        },
        errors = if report.errors.is_empty() {
            "none".to_string()
        } else {
            report.errors.join("\n")
        },
    );

    memory_hash::write_atomic(&ctx.reports_dir().join(name), &body)
        .context("failed to write session report")
        .map(|_| ())
}

/// Walk the transaction log in reverse and restore every `replace_stubs`
/// target from its recorded pre-modification hash. Entries missing either
/// field are skipped with a warning rather than aborting the whole rollback.
///
/// Exposed so the orchestrator can invoke the same restoration logic when a
/// phase fails mid-run, not just when validation itself rejects the run.
pub fn rollback(ctx: &PhaseContext) -> Result<()> {
    let entries = ctx.transaction_log.read()?;
    for entry in memory_txlog::TransactionLog::get_reverse(&entries) {
        if entry.action != "replace_stubs" || entry.status != TxStatus::Success {
            continue;
        }
        let (Some(target), Some(hash)) = (&entry.target, &entry.hash) else {
            tracing::warn!(action = %entry.action, "rollback entry missing target or hash, skipping");
            continue;
        };
        let path = ctx.memory_dir.join(target);
        if let Err(err) = ctx.backups.restore(hash, &path) {
            tracing::error!(file = %path, error = %err, "failed to restore file during rollback");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_report_defaults_to_empty() {
        let report = ValidationReport::default();
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }
}
