//! Process launch, concurrent line capture, and deadline enforcement.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::classify::Invocation;
use crate::error::ExecError;
use crate::result::{EXIT_CODE_UNAVAILABLE, ExecutionResult, preview};

/// How long the readers may keep draining after the process was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
}

/// Launch `invocation`, streaming each stdout/stderr line to the matching sink.
///
/// Both streams are drained before the exit status is awaited. A non-zero exit
/// is returned as `Ok`; only failure to start, timeout, cancellation, or an I/O
/// error while waiting produce `Err`. On timeout the partial output is carried
/// inside `ExecError::Timeout`.
///
/// # Errors
///
/// Returns `ExecError::Spawn`, `ExecError::Timeout`, `ExecError::Cancelled`, or
/// `ExecError::Io`.
pub async fn run_streaming<F, G>(
    invocation: &Invocation,
    working_dir: Option<&Path>,
    timeout: Duration,
    cancel: Option<&CancellationToken>,
    mut on_stdout: F,
    mut on_stderr: G,
) -> Result<ExecutionResult, ExecError>
where
    F: FnMut(&str) + Send,
    G: FnMut(&str) + Send,
{
    let program = invocation.program();
    let args = invocation.args();
    tracing::info!(
        command = %program,
        args = %args.join(" "),
        dir = ?working_dir,
        "executing command"
    );

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let started_at = Utc::now();
    let clock = std::time::Instant::now();
    let deadline = tokio::time::Instant::now() + timeout;

    let mut child = cmd.spawn().map_err(|source| {
        tracing::warn!(command = %program, "failed to start command: {source}");
        ExecError::Spawn {
            program: program.clone(),
            source,
        }
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr not captured"))?;

    let mut stdout_text = String::new();
    let mut stderr_text = String::new();

    let mut interrupt = {
        let drain = async {
            tokio::join!(
                pump_lines(stdout, &mut stdout_text, &mut on_stdout),
                pump_lines(stderr, &mut stderr_text, &mut on_stderr),
            )
        };
        tokio::pin!(drain);

        let interrupt = tokio::select! {
            (out, err) = &mut drain => {
                log_read_error("stdout", out);
                log_read_error("stderr", err);
                None
            }
            () = tokio::time::sleep_until(deadline) => Some(Interrupt::Timeout),
            () = cancelled(cancel) => Some(Interrupt::Cancelled),
        };

        if interrupt.is_some() {
            terminate(&mut child).await;
            if tokio::time::timeout(DRAIN_GRACE, &mut drain).await.is_err() {
                tracing::warn!(command = %program, "output still open after kill, abandoning readers");
            }
        }
        interrupt
    };

    let mut status = None;
    if interrupt.is_none() {
        tokio::select! {
            res = child.wait() => status = Some(res?),
            () = tokio::time::sleep_until(deadline) => interrupt = Some(Interrupt::Timeout),
            () = cancelled(cancel) => interrupt = Some(Interrupt::Cancelled),
        }
        if interrupt.is_some() {
            terminate(&mut child).await;
        }
    }

    let elapsed = clock.elapsed();
    let exit_code = status
        .and_then(|s| s.code())
        .unwrap_or(EXIT_CODE_UNAVAILABLE);
    let result = ExecutionResult::from_elapsed(
        program,
        &args,
        stdout_text,
        stderr_text,
        exit_code,
        started_at,
        elapsed,
    );

    match interrupt {
        Some(Interrupt::Timeout) => {
            tracing::warn!(
                command = %result.command,
                args = %result.args,
                "command timed out after {}s",
                timeout.as_secs()
            );
            Err(ExecError::Timeout {
                timeout_secs: timeout.as_secs(),
                partial: Some(Box::new(result)),
            })
        }
        Some(Interrupt::Cancelled) => {
            tracing::info!(command = %result.command, "command cancelled");
            Err(ExecError::Cancelled)
        }
        None => {
            log_outcome(&result);
            Ok(result)
        }
    }
}

async fn pump_lines<R, F>(reader: R, text: &mut String, on_line: &mut F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = normalize_line(&buf);
        text.push_str(&line);
        on_line(&line);
    }
}

/// Decode a raw line and make it end with exactly one `\n`.
fn normalize_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let line = text.strip_suffix('\n').unwrap_or(&text);
    let line = line.strip_suffix('\r').unwrap_or(line);
    format!("{line}\n")
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Kill the child and, on Unix, every process in its group.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        #[allow(clippy::cast_possible_wrap)]
        let pgid = Pid::from_raw(pid as i32);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            tracing::debug!(pid, "killpg failed: {e}");
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!("kill failed: {e}");
    }
}

fn log_read_error(stream: &str, res: std::io::Result<()>) {
    if let Err(e) = res {
        tracing::warn!(stream, "failed to read command output: {e}");
    }
}

fn log_outcome(result: &ExecutionResult) {
    if result.success() {
        tracing::info!(command = %result.command, args = %result.args, "command executed successfully");
    } else {
        tracing::info!(
            command = %result.command,
            args = %result.args,
            exit_code = result.exit_code,
            "command exited with non-zero code"
        );
    }
    if !result.stdout.is_empty() {
        tracing::debug!("command output: {}", preview(&result.stdout, PREVIEW_CHARS));
    }
    if !result.stderr.is_empty() {
        tracing::debug!("command error: {}", preview(&result.stderr, PREVIEW_CHARS));
    }
}
