//! memory-polish CLI binary
//!
//! Minimal entrypoint; all logic lives in the library.

use clap::Parser;
use memory_polish::cli::{Cli, Command};
use memory_polish::errors::ExitCode;

fn main() {
    let cli = Cli::parse();
    let Command::Run(args) = cli.command;
    memory_polish::logging::init(args.verbose);

    match memory_polish::orchestrator::run(args) {
        Ok(code) => std::process::exit(code.as_i32()),
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            std::process::exit(ExitCode::from(&err).as_i32());
        }
    }
}
