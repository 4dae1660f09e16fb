mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use startit_exec::{CancellationToken, CommandExecutor, ExecutionResult, Invocation};
use startit_jobs::{JobRegistry, JobSnapshot, JobStatus};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Run shell commands with deadlines, streaming output, and a safety denylist.
#[derive(Parser, Debug)]
#[command(name = "startit", version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON instead of raw output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command and wait for it, streaming its output
    Run {
        /// Working directory
        #[arg(long, short = 'C', default_value = ".")]
        dir: PathBuf,

        /// Deadline in seconds (defaults to exec.timeout)
        #[arg(long)]
        timeout: Option<u64>,

        /// Command to execute
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Start a background job and poll it until it finishes
    Submit {
        /// Working directory
        #[arg(long, short = 'C', default_value = ".")]
        dir: PathBuf,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 250)]
        poll_ms: u64,

        /// Command to execute
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Run several commands in sequence
    Batch {
        /// Working directory
        #[arg(long, short = 'C', default_value = ".")]
        dir: PathBuf,

        /// Stop at the first command that fails
        #[arg(long)]
        stop_on_error: bool,

        /// Commands, one per argument
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Show how a command would be launched without running it
    Check {
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_subscriber();
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    config.validate()?;
    let executor = CommandExecutor::new(&config.exec);

    match cli.command {
        Commands::Run {
            dir,
            timeout,
            command,
        } => run(&executor, &dir, timeout, &command.join(" "), cli.json).await,
        Commands::Submit {
            dir,
            poll_ms,
            command,
        } => {
            let registry = JobRegistry::new(executor, &config.jobs);
            submit(
                &registry,
                &dir,
                Duration::from_millis(poll_ms.max(10)),
                &command.join(" "),
                cli.json,
            )
            .await
        }
        Commands::Batch {
            dir,
            stop_on_error,
            commands,
        } => batch(&executor, &dir, &commands, stop_on_error, cli.json).await,
        Commands::Check { command } => check(&executor, &command.join(" "), cli.json),
    }
}

fn init_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("STARTIT_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{text}");
    Ok(())
}

/// Cancel `token` on ctrl-c.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        token.cancel();
    });
}

async fn run(
    executor: &CommandExecutor,
    dir: &Path,
    timeout: Option<u64>,
    command: &str,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let mut request = executor.request(command).in_dir(dir);
    if let Some(secs) = timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let result = executor
        .run_streaming(
            &request,
            Some(&cancel),
            move |line: &str| {
                if !json {
                    print!("{line}");
                }
            },
            move |line: &str| {
                if !json {
                    eprint!("{line}");
                }
            },
        )
        .await
        .with_context(|| format!("failed to run '{command}'"))?;

    if json {
        print_json(&result)?;
    }
    Ok(exit_code(result.exit_code))
}

async fn submit(
    registry: &JobRegistry,
    dir: &Path,
    poll: Duration,
    command: &str,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = registry.spawn_cleanup(shutdown_rx)?;

    let id = registry
        .submit(command, dir)
        .with_context(|| format!("failed to submit '{command}'"))?;
    if !json {
        eprintln!("submitted job {id}");
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut printed_out = 0;
    let mut printed_err = 0;
    let mut shutting_down = false;
    let mut interval = tokio::time::interval(poll);
    let snapshot = loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = cancel.cancelled(), if !shutting_down => {
                shutting_down = true;
                registry.shutdown();
            }
        }

        let snap = registry
            .get_status(&id)
            .with_context(|| format!("job {id} disappeared"))?;
        if !json {
            print_new(&snap, &mut printed_out, &mut printed_err);
        }
        if snap.is_finished() {
            break snap;
        }
    };

    let _ = shutdown_tx.send(true);
    if let Err(e) = cleanup.await {
        tracing::warn!("cleanup task failed: {e}");
    }

    if json {
        print_json(&snapshot)?;
    } else if let Some(error) = &snapshot.error {
        eprintln!("job {id} {}: {error}", snapshot.status);
    }

    Ok(match (snapshot.status, &snapshot.result) {
        (JobStatus::Completed, _) => ExitCode::SUCCESS,
        (_, Some(result)) => exit_code(result.exit_code),
        _ => ExitCode::FAILURE,
    })
}

/// Print whatever output the job produced since the last poll.
fn print_new(snap: &JobSnapshot, printed_out: &mut usize, printed_err: &mut usize) {
    if let Some(new) = snap.current_output.get(*printed_out..)
        && !new.is_empty()
    {
        print!("{new}");
        *printed_out = snap.current_output.len();
    }
    if let Some(new) = snap.current_error.get(*printed_err..)
        && !new.is_empty()
    {
        eprint!("{new}");
        *printed_err = snap.current_error.len();
    }
}

async fn batch(
    executor: &CommandExecutor,
    dir: &Path,
    commands: &[String],
    stop_on_error: bool,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let results = executor
        .run_batch(commands, dir, stop_on_error)
        .await
        .context("batch aborted")?;

    if json {
        print_json(&results)?;
    } else {
        for result in &results {
            print_summary(result);
        }
    }
    Ok(results
        .iter()
        .find(|r| !r.success())
        .map_or(ExitCode::SUCCESS, |r| exit_code(r.exit_code)))
}

fn print_summary(result: &ExecutionResult) {
    let line = if result.args.is_empty() {
        result.command.clone()
    } else {
        format!("{} {}", result.command, result.args)
    };
    println!("$ {line}  [exit {}, {:.2?}]", result.exit_code, result.duration);
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckReport {
    command: String,
    blocked: Option<String>,
    shell: bool,
    program: Option<String>,
    args: Vec<String>,
}

fn check(executor: &CommandExecutor, command: &str, json: bool) -> anyhow::Result<ExitCode> {
    let blocked = executor.filter().find_blocked(command).map(str::to_owned);
    let invocation = if blocked.is_some() {
        None
    } else {
        Some(startit_exec::classify(command, executor.shell())?)
    };

    let report = CheckReport {
        command: command.to_owned(),
        blocked,
        shell: invocation.as_ref().is_some_and(Invocation::is_shell),
        program: invocation.as_ref().map(Invocation::program),
        args: invocation.as_ref().map(Invocation::args).unwrap_or_default(),
    };

    if json {
        print_json(&report)?;
    } else if let Some(pattern) = &report.blocked {
        println!("blocked: matches '{pattern}'");
    } else if let Some(program) = &report.program {
        println!("{program} {}", report.args.join(" "));
    }
    Ok(if report.blocked.is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
