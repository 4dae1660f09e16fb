use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use startit_exec::{CancellationToken, ErrorKind, ExecError, ExecutionResult};

/// Lifecycle of a background job. `Completed`, `Failed`, and `Timeout` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Failed),
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Timeout => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque job identifier (random v4 UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Point-in-time copy of a job, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub command: String,
    pub repo_path: PathBuf,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub current_output: String,
    pub current_error: String,
}

impl JobSnapshot {
    /// True once the job reached a terminal status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug)]
pub(crate) struct JobState {
    pub(crate) status: JobStatus,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    pub(crate) result: Option<ExecutionResult>,
    pub(crate) error: Option<String>,
    pub(crate) current_output: String,
    pub(crate) current_error: String,
}

impl JobState {
    fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// A tracked background job. Immutable identity plus state behind a job-local lock.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) command: String,
    pub(crate) repo_path: PathBuf,
    pub(crate) cancel: CancellationToken,
    state: Mutex<JobState>,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        command: String,
        repo_path: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            command,
            repo_path,
            cancel,
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                started_at: Utc::now(),
                ended_at: None,
                result: None,
                error: None,
                current_output: String::new(),
                current_error: String::new(),
            }),
        }
    }

    /// Lock the job state. A panic while holding the lock leaves plain data
    /// behind, so a poisoned lock is still usable.
    pub(crate) fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn append_output(&self, line: &str) {
        self.state().current_output.push_str(line);
    }

    pub(crate) fn append_error(&self, line: &str) {
        self.state().current_error.push_str(line);
    }

    pub(crate) fn mark_running(&self) -> bool {
        self.state().transition(JobStatus::Running)
    }

    /// Record the terminal outcome. Returns the new status, or `None` if the
    /// current status does not allow it.
    pub(crate) fn finish(&self, outcome: Result<ExecutionResult, ExecError>) -> Option<JobStatus> {
        let (status, result, error) = match outcome {
            Ok(result) if result.success() => (JobStatus::Completed, Some(result), None),
            Ok(result) => (JobStatus::Failed, Some(result), None),
            Err(e) if e.kind() == ErrorKind::Timeout => (JobStatus::Timeout, None, Some(e.to_string())),
            Err(e) => (JobStatus::Failed, None, Some(e.to_string())),
        };

        let mut state = self.state();
        if !state.transition(status) {
            return None;
        }
        state.ended_at = Some(Utc::now());
        state.result = result;
        state.error = error;
        Some(status)
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        let state = self.state();
        JobSnapshot {
            id: self.id.clone(),
            command: self.command.clone(),
            repo_path: self.repo_path.clone(),
            status: state.status,
            started_at: state.started_at,
            ended_at: state.ended_at,
            result: state.result.clone(),
            error: state.error.clone(),
            current_output: state.current_output.clone(),
            current_error: state.current_error.clone(),
        }
    }
}
