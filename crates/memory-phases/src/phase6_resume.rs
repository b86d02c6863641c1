use anyhow::Result;
use memory_checkpoint::{Checkpoint, CheckpointStore, RunStatus};
use memory_phase_api::RunState;

pub struct ResumePhase;

#[derive(Debug)]
pub struct ResumeDecision {
    pub should_resume: bool,
    pub checkpoint: Option<Checkpoint<RunState>>,
}

impl ResumePhase {
    /// Inspect the checkpoint at `checkpoint_path`. A completed checkpoint
    /// is archived and treated as a fresh start; a missing checkpoint is
    /// also a fresh start. Anything else is a resume candidate — the
    /// orchestrator decides non-interactively to always resume.
    pub fn decide(
        store: &CheckpointStore,
        workspace_root: &camino::Utf8Path,
    ) -> Result<ResumeDecision> {
        let Some(checkpoint) = store.load::<RunState>(workspace_root)? else {
            return Ok(ResumeDecision {
                should_resume: false,
                checkpoint: None,
            });
        };

        if checkpoint.status == RunStatus::Completed {
            store.archive(checkpoint.started_at)?;
            return Ok(ResumeDecision {
                should_resume: false,
                checkpoint: None,
            });
        }

        tracing::info!(
            session = %checkpoint.session_id,
            phase = checkpoint.current_phase,
            progress = checkpoint.progress_percent(),
            steps = ?checkpoint.completed_steps,
            "resuming from checkpoint"
        );

        Ok(ResumeDecision {
            should_resume: true,
            checkpoint: Some(checkpoint),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use chrono::Utc;
    use memory_checkpoint::{generate_session_id, CHECKPOINT_VERSION};
    use tempfile::TempDir;

    #[test]
    fn resume_decision_is_fresh_when_no_checkpoint_exists() {
        let dir = TempDir::new().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = CheckpointStore::new(base.join("checkpoint.json"));

        let decision = ResumePhase::decide(&store, &base).unwrap();
        assert!(!decision.should_resume);
    }

    #[test]
    fn resume_decision_resumes_in_progress_checkpoint() {
        let dir = TempDir::new().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = CheckpointStore::new(base.join("checkpoint.json"));

        let now = Utc::now();
        let cp = Checkpoint {
            version: CHECKPOINT_VERSION,
            session_id: generate_session_id(now, "abc123"),
            started_at: now,
            updated_at: now,
            current_phase: 3,
            completed_steps: vec!["init".into(), "discover".into()],
            status: memory_checkpoint::RunStatus::InProgress,
            base_path: base.clone(),
            state: RunState::default(),
        };
        store.save(&cp).unwrap();

        let decision = ResumePhase::decide(&store, &base).unwrap();
        assert!(decision.should_resume);
        assert_eq!(decision.checkpoint.unwrap().current_phase, 3);
    }

    #[test]
    fn resume_decision_treats_completed_checkpoint_as_fresh() {
        let dir = TempDir::new().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = CheckpointStore::new(base.join("checkpoint.json"));

        let now = Utc::now();
        let cp = Checkpoint {
            version: CHECKPOINT_VERSION,
            session_id: generate_session_id(now, "abc123"),
            started_at: now,
            updated_at: now,
            current_phase: 6,
            completed_steps: vec![],
            status: memory_checkpoint::RunStatus::Completed,
            base_path: base.clone(),
            state: RunState::default(),
        };
        store.save(&cp).unwrap();

        let decision = ResumePhase::decide(&store, &base).unwrap();
        assert!(!decision.should_resume);
        assert!(!store.exists());
    }
}
