//! Command-line surface.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "memory-polish", version, about = "Turn dated daily logs into curated topic files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the discover -> extract -> organize -> update -> validate pipeline.
    Run(RunArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Workspace root containing AGENTS.md and memory/. Auto-discovered from
    /// the current directory (or MEMORY_DIR/OPENCLAW_WORKSPACE) when omitted.
    #[arg(long)]
    pub workspace: Option<Utf8PathBuf>,

    /// Report what would change without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Archive eligible daily logs after stubbing them (overrides config).
    #[arg(long)]
    pub archive: bool,

    /// Enable debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the configured lookback window, in days.
    #[arg(long)]
    pub lookback_days: Option<u32>,

    /// Ignore any existing checkpoint and start a fresh run.
    #[arg(long)]
    pub no_resume: bool,

    /// Delete any existing checkpoint before running.
    #[arg(long)]
    pub clear_checkpoint: bool,

    /// Force a resumed run to restart from a named phase instead of the
    /// phase recorded in the checkpoint.
    #[arg(long, value_name = "PHASE")]
    pub force_from_phase: Option<String>,
}
