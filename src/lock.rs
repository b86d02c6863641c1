//! Advisory single-instance lock, keyed by workspace path.
//!
//! Concurrent multi-process runs against the same workspace are not a
//! supported feature (see the Non-goals); this lock exists purely to fail
//! fast instead of letting two runs corrupt each other's state.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};

use crate::errors::PolishError;

pub struct RunLock {
    _file: RwLock<File>,
}

impl RunLock {
    pub fn acquire(path: &Utf8PathBuf) -> Result<Self, PolishError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .with_context(|| format!("failed to create lock directory: {parent}"))
                .map_err(PolishError::Io)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_std_path())
            .with_context(|| format!("failed to open lock file: {path}"))
            .map_err(PolishError::Io)?;

        let mut lock = RwLock::new(file);
        let _guard = lock.try_write().map_err(|_| PolishError::Locked)?;
        std::mem::forget(_guard);

        Ok(Self { _file: lock })
    }
}
