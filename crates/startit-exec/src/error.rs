use std::path::PathBuf;

use crate::result::ExecutionResult;

/// Broad failure class, used by callers to pick a remedy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any process started.
    Precondition,
    /// The OS could not launch the process.
    Start,
    /// The deadline elapsed and the process was killed.
    Timeout,
    /// Execution was cancelled before the deadline.
    Cancelled,
    /// The process ran but reading or waiting on it failed, or it exited non-zero.
    Execution,
}

/// Errors that can occur while executing a command.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    #[error("command contains potentially unsafe operations: {pattern}")]
    Blocked { pattern: String },

    #[error("working directory does not exist: {}", path.display())]
    WorkingDirNotFound { path: PathBuf },

    #[error("failed to start command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {timeout_secs}s")]
    Timeout {
        timeout_secs: u64,
        partial: Option<Box<ExecutionResult>>,
    },

    #[error("command cancelled")]
    Cancelled,

    #[error("command exited with code {code}")]
    NonZeroExit { code: i32, output: String },

    #[error("failed to execute command: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyCommand | Self::Blocked { .. } | Self::WorkingDirNotFound { .. } => {
                ErrorKind::Precondition
            }
            Self::Spawn { .. } => ErrorKind::Start,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NonZeroExit { .. } | Self::Io(_) => ErrorKind::Execution,
        }
    }

    /// Output captured before a streaming execution timed out.
    #[must_use]
    pub fn partial_result(&self) -> Option<&ExecutionResult> {
        match self {
            Self::Timeout {
                partial: Some(result),
                ..
            } => Some(result),
            _ => None,
        }
    }
}
