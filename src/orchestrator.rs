//! Wires `ResumePhase::decide`, the six `Phase` implementations, and
//! checkpoint/transaction-log bookkeeping into one run.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use chrono::Utc;
use memory_backup::BackupStore;
use memory_checkpoint::{Checkpoint, CheckpointStore, RunStatus, CHECKPOINT_VERSION};
use memory_config::RunConfig;
use memory_phase_api::{NextStep, Phase, PhaseContext, PhaseError, PhaseId, RunState};
use memory_phases::{
    rollback, DiscoverPhase, ExtractPhase, InitPhase, OrganizePhase, ResumePhase, UpdatePhase,
    ValidatePhase,
};
use memory_txlog::TransactionLog;
use std::sync::Arc;

use crate::cli::RunArgs;
use crate::errors::PolishError;

fn phase_name(id: PhaseId) -> &'static str {
    match id {
        PhaseId::Init => "init",
        PhaseId::Discover => "discover",
        PhaseId::Extract => "extract",
        PhaseId::Organize => "organize",
        PhaseId::Update => "update",
        PhaseId::Validate => "validate",
        PhaseId::Resume => "resume",
    }
}

fn parse_phase_name(name: &str) -> Option<PhaseId> {
    match name {
        "init" => Some(PhaseId::Init),
        "discover" => Some(PhaseId::Discover),
        "extract" => Some(PhaseId::Extract),
        "organize" => Some(PhaseId::Organize),
        "update" => Some(PhaseId::Update),
        "validate" => Some(PhaseId::Validate),
        _ => None,
    }
}

/// Build the `PhaseContext` for a run against `workspace_root`, applying CLI
/// overrides on top of the loaded config.
fn build_context(
    workspace_root: Utf8PathBuf,
    args: &RunArgs,
    session_id: String,
) -> Result<PhaseContext, PolishError> {
    let memory_dir = workspace_root.join("memory");
    let mut config: RunConfig = memory_config::load(&workspace_root).map_err(PolishError::Io)?;

    if let Some(days) = args.lookback_days {
        config.advanced.lookback_days = days;
    }
    if args.archive {
        config.archive.enabled = true;
    }
    if args.verbose {
        config.logging.verbose = true;
    }

    let backups = Arc::new(BackupStore::new(memory_dir.join(&config.advanced.cache_directory).join("backups")));
    let transaction_log = Arc::new(TransactionLog::new(
        memory_dir.join(&config.advanced.cache_directory).join("transaction.log"),
    ));

    Ok(PhaseContext {
        workspace_root,
        memory_dir,
        config,
        session_id,
        started_at: Utc::now(),
        dry_run: args.dry_run,
        backups,
        transaction_log,
    })
}

/// Run the full pipeline for `args`, returning the exit code the process
/// should terminate with.
pub fn run(args: RunArgs) -> Result<crate::errors::ExitCode, PolishError> {
    let start_dir = match &args.workspace {
        Some(w) => w.clone(),
        None => {
            let cwd = std::env::current_dir()
                .context("failed to read current directory")
                .map_err(PolishError::Io)?;
            Utf8PathBuf::from_path_buf(cwd)
                .map_err(|p| PolishError::Preflight(format!("non-UTF8 working directory: {}", p.display())))?
        }
    };

    let workspace_root = memory_config::discover_workspace(&start_dir, &|key| std::env::var(key).ok())
        .or_else(|| args.workspace.clone())
        .ok_or_else(|| {
            PolishError::Preflight(
                "could not locate a workspace (no AGENTS.md + memory/ found in any parent directory)".into(),
            )
        })?;

    if !workspace_root.join("memory").is_dir() {
        return Err(PolishError::Preflight(format!(
            "workspace {workspace_root} has no memory/ directory"
        )));
    }

    let _lock = crate::lock::RunLock::acquire(
        &workspace_root.join("memory").join(".polish-cache").join("polish.lock"),
    )?;

    let checkpoint_path = workspace_root
        .join("memory")
        .join(".polish-cache")
        .join("checkpoint.json");
    let checkpoint_store = CheckpointStore::new(checkpoint_path);

    if args.clear_checkpoint {
        checkpoint_store.delete().map_err(PolishError::Io)?;
    }

    let phases: Vec<Box<dyn Phase>> = vec![
        Box::new(InitPhase),
        Box::new(DiscoverPhase),
        Box::new(ExtractPhase),
        Box::new(OrganizePhase),
        Box::new(UpdatePhase),
        Box::new(ValidatePhase),
    ];

    let resume_decision = if args.no_resume {
        None
    } else {
        let decision = ResumePhase::decide(&checkpoint_store, &workspace_root).map_err(PolishError::Io)?;
        if decision.should_resume {
            decision.checkpoint
        } else {
            None
        }
    };

    let (session_id, mut state, mut start_index, mut completed_steps) = match resume_decision {
        Some(checkpoint) => {
            let resume_from = args
                .force_from_phase
                .as_deref()
                .and_then(parse_phase_name)
                .map(|id| id.ordinal() as usize)
                .unwrap_or(checkpoint.current_phase as usize);
            (
                checkpoint.session_id,
                checkpoint.state,
                resume_from,
                checkpoint.completed_steps,
            )
        }
        None => (
            memory_checkpoint::generate_session_id(Utc::now(), &format!("{:06x}", std::process::id())),
            RunState::default(),
            0,
            Vec::new(),
        ),
    };

    let ctx = build_context(workspace_root.clone(), &args, session_id.clone())?;

    if ctx.config.recovery.enable_checkpoints {
        std::fs::create_dir_all(ctx.cache_dir().as_std_path()).map_err(|e| PolishError::Io(e.into()))?;
    }

    for phase in phases.iter().skip(start_index) {
        tracing::info!(phase = phase_name(phase.id()), "starting phase");
        let result = match phase.run(&ctx, state) {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(
                    phase = phase_name(phase.id()),
                    error = %err,
                    "phase failed, rolling back"
                );
                if let Err(rollback_err) = rollback(&ctx) {
                    tracing::error!(error = %rollback_err, "rollback itself failed");
                }
                return Err(classify_phase_error(err));
            }
        };
        state = result.state;
        completed_steps.push(phase_name(phase.id()).to_string());
        start_index += 1;

        if ctx.config.recovery.enable_checkpoints && !ctx.dry_run {
            let checkpoint = Checkpoint {
                version: CHECKPOINT_VERSION,
                session_id: session_id.clone(),
                started_at: ctx.started_at,
                updated_at: Utc::now(),
                current_phase: phase.id().ordinal() + 1,
                completed_steps: completed_steps.clone(),
                status: RunStatus::InProgress,
                base_path: workspace_root.clone(),
                state: state.clone(),
            };
            checkpoint_store.save(&checkpoint).map_err(PolishError::Io)?;
        }

        match result.next_step {
            NextStep::Continue => {}
            NextStep::Rewind { to } => {
                start_index = to.ordinal() as usize;
            }
            NextStep::Complete => {
                if ctx.config.recovery.enable_checkpoints {
                    let checkpoint = Checkpoint {
                        version: CHECKPOINT_VERSION,
                        session_id: session_id.clone(),
                        started_at: ctx.started_at,
                        updated_at: Utc::now(),
                        current_phase: PhaseId::Validate.ordinal() + 1,
                        completed_steps: completed_steps.clone(),
                        status: RunStatus::Completed,
                        base_path: workspace_root.clone(),
                        state: state.clone(),
                    };
                    checkpoint_store.save(&checkpoint).map_err(PolishError::Io)?;
                }
                ctx.transaction_log.archive(Utc::now()).map_err(PolishError::Io)?;
                tracing::info!(session = %session_id, "run complete");
                return Ok(crate::errors::ExitCode::Success);
            }
            NextStep::Rollback => {
                tracing::error!(session = %session_id, "validation failed, changes were rolled back");
                return Err(PolishError::Validation(
                    "one or more validation checks failed; changes were rolled back".into(),
                ));
            }
        }
    }

    Ok(crate::errors::ExitCode::Success)
}

/// Map a phase's `anyhow::Error` onto the right `PolishError` variant,
/// preserving the failure's real cause instead of collapsing every phase
/// error into `PolishError::Io`.
fn classify_phase_error(err: anyhow::Error) -> PolishError {
    match err.downcast::<PhaseError>() {
        Ok(PhaseError::Security(message)) => PolishError::Security(message),
        Ok(PhaseError::Integrity(message)) => PolishError::Integrity(message),
        Err(err) => PolishError::Io(err),
    }
}
