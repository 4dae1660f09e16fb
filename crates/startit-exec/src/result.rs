use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Exit code recorded when the process could not report one.
pub const EXIT_CODE_UNAVAILABLE: i32 = -1;

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub command: String,
    pub args: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ExecutionResult {
    /// Build a result, deriving `duration` from the two timestamps. An
    /// `ended_at` earlier than `started_at` yields a zero duration; use
    /// [`ExecutionResult::from_elapsed`] when a monotonic measurement exists.
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        args: &[String],
        stdout: String,
        stderr: String,
        exit_code: i32,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            command: command.into(),
            args: args.join(" "),
            stdout,
            stderr,
            exit_code,
            started_at,
            ended_at,
            duration: (ended_at - started_at).to_std().unwrap_or_default(),
        }
    }

    /// Build a result from a monotonic `elapsed` measurement. `ended_at` is
    /// `started_at + elapsed`, so `duration == ended_at - started_at` holds even
    /// if the wall clock stepped backwards during the run.
    #[must_use]
    pub fn from_elapsed(
        command: impl Into<String>,
        args: &[String],
        stdout: String,
        stderr: String,
        exit_code: i32,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let ended_at = TimeDelta::from_std(elapsed)
            .ok()
            .and_then(|delta| started_at.checked_add_signed(delta))
            .unwrap_or(started_at);
        Self::new(command, args, stdout, stderr, exit_code, started_at, ended_at)
    }

    /// Placeholder for a command that never produced a process.
    #[must_use]
    pub fn not_started(command: impl Into<String>, args: &[String], error: String) -> Self {
        let now = Utc::now();
        Self::new(
            command,
            args,
            String::new(),
            error,
            EXIT_CODE_UNAVAILABLE,
            now,
            now,
        )
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// First `max` characters of `text`, with an ellipsis when cut.
#[must_use]
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}
