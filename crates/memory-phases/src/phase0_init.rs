use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::{Duration, Utc};
use memory_phase_api::{Phase, PhaseContext, PhaseId, PhaseMetadata, PhaseResult, RunState};
use memory_txlog::{TransactionEntry, TxStatus};
use std::fs;

/// Backups and archiving both duplicate data in flight, so warn once free
/// space drops under this multiple of what's already on disk.
const MIN_FREE_SPACE_MULTIPLE: u64 = 2;

pub struct InitPhase;

impl Phase for InitPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Init
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[]
    }

    fn can_resume(&self) -> bool {
        false
    }

    fn run(&self, ctx: &PhaseContext, mut state: RunState) -> Result<PhaseResult> {
        if !ctx.memory_dir.is_dir() {
            anyhow::bail!("memory directory not found: {}", ctx.memory_dir);
        }

        let total_size = directory_size(&ctx.memory_dir);
        if let Some(available) = available_disk_space(&ctx.memory_dir) {
            if available < total_size.saturating_mul(MIN_FREE_SPACE_MULTIPLE) {
                tracing::warn!(
                    total_memory_size = total_size,
                    available_disk_space = available,
                    "available disk space looks insufficient for this run's backups and archiving"
                );
            }
        }

        for dir in [
            ctx.cache_dir().join("backups"),
            ctx.cache_dir().join("extractions"),
            ctx.cache_dir().join("embeddings"),
            ctx.reports_dir(),
        ] {
            fs::create_dir_all(dir.as_std_path())
                .with_context(|| format!("failed to create directory: {dir}"))?;
        }

        let lookback_start = ctx.started_at.date_naive() - Duration::days(ctx.config.advanced.lookback_days as i64);
        let end = ctx.started_at.date_naive();
        let logs = memory_scanner::find_daily_logs(&ctx.memory_dir, Some(lookback_start), Some(end))
            .with_context(|| format!("failed to scan memory directory: {}", ctx.memory_dir))?;

        for relative in &logs {
            let path = ctx.memory_dir.join(relative);
            let outcome = (|| -> Result<()> {
                let content = fs::read_to_string(path.as_std_path())
                    .with_context(|| format!("failed to read {path}"))?;
                let hash = memory_hash::hash_str(&content);
                ctx.backups.create(&content, Some(&hash))?;
                state.stats.backups_created += 1;
                Ok(())
            })();

            let status = if outcome.is_ok() {
                TxStatus::Success
            } else {
                TxStatus::Failed
            };
            if let Err(err) = &outcome {
                tracing::warn!(file = %path, error = %err, "failed to back up daily log");
            }

            ctx.transaction_log.append(&TransactionEntry {
                timestamp: Utc::now(),
                phase: "init".to_string(),
                action: "backup".to_string(),
                target: Some(relative.clone()),
                hash: None,
                source: None,
                destination: None,
                status,
            })?;
        }

        Ok(PhaseResult {
            state,
            next_step: memory_phase_api::NextStep::Continue,
            metadata: PhaseMetadata::default(),
        })
    }
}

/// Best-effort recursive size of every file under `dir`, in bytes. Unreadable
/// entries are skipped rather than failing the whole preflight check.
fn directory_size(dir: &Utf8Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir.as_std_path()) else {
        return 0;
    };

    let mut total = 0u64;
    for entry in entries.filter_map(|e| e.ok()) {
        let Ok(child) = camino::Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        total += match entry.file_type() {
            Ok(ft) if ft.is_dir() => directory_size(&child),
            Ok(ft) if ft.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        };
    }
    total
}

#[cfg(unix)]
fn available_disk_space(path: &Utf8Path) -> Option<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(path.as_str()).ok()?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let stat = unsafe { stat.assume_init() };
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn available_disk_space(_path: &Utf8Path) -> Option<u64> {
    None
}
