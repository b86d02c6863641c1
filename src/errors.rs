//! Typed error taxonomy and the exit codes each variant maps to.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolishError {
    #[error("preflight check failed: {0}")]
    Preflight(String),

    #[error("embedding provider failed: {0}")]
    Provider(#[source] anyhow::Error),

    #[error("filesystem operation failed: {0}")]
    Io(#[source] anyhow::Error),

    #[error("security violation: {0}")]
    Security(String),

    #[error("validation failed, rolled back: {0}")]
    Validation(String),

    #[error("content integrity check failed: {0}")]
    Integrity(String),

    #[error("another run is already in progress against this workspace")]
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Preflight = 10,
    Security = 20,
    Validation = 30,
    Integrity = 31,
    Locked = 40,
    Unexpected = 1,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<&PolishError> for ExitCode {
    fn from(err: &PolishError) -> Self {
        match err {
            PolishError::Preflight(_) => ExitCode::Preflight,
            PolishError::Provider(_) | PolishError::Io(_) => ExitCode::Unexpected,
            PolishError::Security(_) => ExitCode::Security,
            PolishError::Validation(_) => ExitCode::Validation,
            PolishError::Integrity(_) => ExitCode::Integrity,
            PolishError::Locked => ExitCode::Locked,
        }
    }
}
