//! End-to-end pipeline tests driving the orchestrator directly against a
//! throwaway workspace (faster and more debuggable than shelling out to the
//! built binary, and it's what `memory-polish run` itself calls).

use camino::Utf8PathBuf;
use memory_polish::cli::RunArgs;
use std::fs;
use tempfile::TempDir;

fn make_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::write(root.join("AGENTS.md"), "# agents\n").unwrap();
    fs::create_dir_all(root.join("memory")).unwrap();
    dir
}

fn run_args(dir: &TempDir, overrides: impl FnOnce(&mut RunArgs)) -> RunArgs {
    let mut args = RunArgs {
        workspace: Some(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()),
        dry_run: false,
        archive: false,
        verbose: false,
        lookback_days: None,
        no_resume: false,
        clear_checkpoint: false,
        force_from_phase: None,
    };
    overrides(&mut args);
    args
}

#[test]
fn happy_path_discovers_extracts_and_organizes() {
    let dir = make_workspace();
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    fs::write(
        dir.path().join("memory").join(format!("memory-{today}.md")),
        "## Morning Notes\nWorked on #trading strategy today.\n\n## Evening Notes\nMore #trading and some #python scripting.\n",
    )
    .unwrap();

    let args = run_args(&dir, |_| {});
    let result = memory_polish::orchestrator::run(args);

    assert!(result.is_ok(), "expected a clean run, got {result:?}");

    let topics_dir = dir.path().join("memory").join("Topics");
    assert!(topics_dir.join("Trading.md").is_file());
    assert!(topics_dir.join("Python.md").is_file());

    let stubbed = fs::read_to_string(dir.path().join("memory").join(format!("memory-{today}.md"))).unwrap();
    assert!(stubbed.contains("Polished to") || stubbed.contains("Primary:"));

    let checkpoint = fs::read_to_string(
        dir.path()
            .join("memory")
            .join(".polish-cache")
            .join("checkpoint.json"),
    );
    assert!(checkpoint.is_ok(), "completed run should still leave an archived or final checkpoint state reachable");
}

#[test]
fn run_fails_preflight_without_memory_dir() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("AGENTS.md"), "# agents\n").unwrap();

    let args = run_args(&dir, |_| {});
    let result = memory_polish::orchestrator::run(args);
    assert!(result.is_err());
}

#[test]
fn resume_continues_from_a_saved_checkpoint() {
    let dir = make_workspace();
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    fs::write(
        dir.path().join("memory").join(format!("memory-{today}.md")),
        "## Notes\nSome #rust content.\n",
    )
    .unwrap();

    let first = memory_polish::orchestrator::run(run_args(&dir, |_| {}));
    assert!(first.is_ok());

    // A second run against the same workspace should see the completed
    // checkpoint, archive it, and start fresh rather than erroring out.
    let second = memory_polish::orchestrator::run(run_args(&dir, |_| {}));
    assert!(second.is_ok());
}

#[test]
fn clear_checkpoint_forces_a_fresh_run() {
    let dir = make_workspace();
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    fs::write(
        dir.path().join("memory").join(format!("memory-{today}.md")),
        "## Notes\nSome #gardening content.\n",
    )
    .unwrap();

    memory_polish::orchestrator::run(run_args(&dir, |_| {})).unwrap();
    let result = memory_polish::orchestrator::run(run_args(&dir, |a| a.clear_checkpoint = true));
    assert!(result.is_ok());
}
