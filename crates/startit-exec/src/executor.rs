use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::classify::{Invocation, classify, discover_shell};
use crate::config::ExecConfig;
use crate::error::ExecError;
use crate::process;
use crate::result::ExecutionResult;
use crate::safety::SafetyFilter;

/// Default deadline for ad-hoc execution.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A command to execute. Immutable once handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub command: String,
    /// When set, `command` is the program and these are passed verbatim.
    pub args: Option<Vec<String>>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: None,
            working_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full text checked against the denylist.
    fn display_text(&self) -> String {
        match &self.args {
            Some(args) if !args.is_empty() => format!("{} {}", self.command, args.join(" ")),
            _ => self.command.clone(),
        }
    }
}

/// Entry point for synchronous and streaming command execution.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: PathBuf,
    timeout: Duration,
    filter: SafetyFilter,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            shell: config.shell.clone().unwrap_or_else(discover_shell),
            timeout: Duration::from_secs(config.timeout),
            filter: SafetyFilter::new(&config.blocked_commands),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn shell(&self) -> &Path {
        &self.shell
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn filter(&self) -> &SafetyFilter {
        &self.filter
    }

    /// Request for `command` using this executor's default timeout.
    #[must_use]
    pub fn request(&self, command: impl Into<String>) -> ExecutionRequest {
        ExecutionRequest::new(command).with_timeout(self.timeout)
    }

    /// Run every precondition check and resolve how the command will launch.
    ///
    /// # Errors
    ///
    /// Returns `Blocked`, `EmptyCommand`, or `WorkingDirNotFound`; no process is
    /// started in any case.
    pub fn prepare(&self, request: &ExecutionRequest) -> Result<Invocation, ExecError> {
        self.filter.check(&request.display_text())?;

        let invocation = match &request.args {
            Some(args) => {
                let program = request.command.trim();
                if program.is_empty() {
                    return Err(ExecError::EmptyCommand);
                }
                Invocation::Direct {
                    program: program.to_owned(),
                    args: args.clone(),
                }
            }
            None => classify(&request.command, &self.shell)?,
        };

        if let Some(dir) = &request.working_dir {
            validate_working_dir(dir)?;
        }
        Ok(invocation)
    }

    /// Run to completion with fully buffered output.
    ///
    /// # Errors
    ///
    /// Precondition, start, timeout, and I/O failures. A timeout carries no
    /// partial result on this path. A non-zero exit is not an error.
    pub async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        self.run_streaming(request, None, |_: &str| {}, |_: &str| {})
            .await
            .map_err(|e| match e {
                ExecError::Timeout { timeout_secs, .. } => ExecError::Timeout {
                    timeout_secs,
                    partial: None,
                },
                other => other,
            })
    }

    /// Run while delivering each output line to the matching sink.
    ///
    /// # Errors
    ///
    /// Precondition, start, timeout (with partial output), cancellation, and I/O
    /// failures. A non-zero exit is not an error.
    pub async fn run_streaming<F, G>(
        &self,
        request: &ExecutionRequest,
        cancel: Option<&CancellationToken>,
        on_stdout: F,
        on_stderr: G,
    ) -> Result<ExecutionResult, ExecError>
    where
        F: FnMut(&str) + Send,
        G: FnMut(&str) + Send,
    {
        let invocation = self.prepare(request)?;
        process::run_streaming(
            &invocation,
            request.working_dir.as_deref(),
            request.timeout,
            cancel,
            on_stdout,
            on_stderr,
        )
        .await
    }

    /// Run `command` in `dir` and return its stdout.
    ///
    /// # Errors
    ///
    /// Any `run` failure, or `NonZeroExit` whose `output` holds stdout followed
    /// by the captured stderr.
    pub async fn run_for_output(&self, command: &str, dir: &Path) -> Result<String, ExecError> {
        let request = self.request(command).in_dir(dir);
        let result = self.run(&request).await?;
        if result.success() {
            Ok(result.stdout)
        } else {
            Err(ExecError::NonZeroExit {
                code: result.exit_code,
                output: format!("{}\nError: {}", result.stdout, result.stderr),
            })
        }
    }

    /// Run `commands` one after another in `dir`.
    ///
    /// Blank entries are skipped. A command that cannot run is recorded as a
    /// result with exit code -1 unless `stop_on_error` is set. With
    /// `stop_on_error`, a non-zero exit ends the batch after recording it.
    ///
    /// # Errors
    ///
    /// With `stop_on_error`, the first failure to run.
    pub async fn run_batch(
        &self,
        commands: &[String],
        dir: &Path,
        stop_on_error: bool,
    ) -> Result<Vec<ExecutionResult>, ExecError> {
        tracing::info!(count = commands.len(), dir = %dir.display(), "executing batch");
        let total = commands.len();
        let mut results = Vec::with_capacity(total);

        for (i, command) in commands.iter().enumerate() {
            if command.trim().is_empty() {
                tracing::debug!("skipping empty command");
                continue;
            }
            tracing::info!("executing command {}/{total}: {command}", i + 1);

            match self.run(&self.request(command.as_str()).in_dir(dir)).await {
                Ok(result) => {
                    let failed = !result.success();
                    results.push(result);
                    if failed && stop_on_error {
                        tracing::info!("stopping batch after failure of command {}/{total}", i + 1);
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("command {}/{total} failed: {e}", i + 1);
                    if stop_on_error {
                        return Err(e);
                    }
                    results.push(ExecutionResult::not_started(command.as_str(), &[], e.to_string()));
                }
            }
        }

        tracing::info!("completed {}/{total} commands", results.len());
        Ok(results)
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(&ExecConfig::default())
    }
}

/// # Errors
///
/// Returns `ExecError::WorkingDirNotFound` unless `dir` is an existing directory.
pub fn validate_working_dir(dir: &Path) -> Result<(), ExecError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(ExecError::WorkingDirNotFound {
            path: dir.to_path_buf(),
        })
    }
}
