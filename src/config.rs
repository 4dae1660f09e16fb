use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::Deserialize;
use startit_exec::ExecConfig;
use startit_jobs::JobsConfig;

/// Top-level configuration loaded from TOML with environment overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl Config {
    /// Load from `path` (defaults when the file is missing), then apply
    /// `STARTIT_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(secs) = env_secs("STARTIT_EXEC_TIMEOUT") {
            self.exec.timeout = secs;
        }
        if let Ok(v) = std::env::var("STARTIT_EXEC_SHELL")
            && !v.trim().is_empty()
        {
            self.exec.shell = Some(PathBuf::from(v.trim()));
        }
        if let Ok(v) = std::env::var("STARTIT_EXEC_BLOCKED_COMMANDS") {
            self.exec.blocked_commands.extend(
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned),
            );
        }
        if let Some(secs) = env_secs("STARTIT_JOBS_TIMEOUT") {
            self.jobs.timeout = secs;
        }
        if let Some(secs) = env_secs("STARTIT_JOBS_RETENTION") {
            self.jobs.retention = secs;
        }
        if let Some(secs) = env_secs("STARTIT_JOBS_CLEANUP_INTERVAL") {
            self.jobs.cleanup_interval = secs;
        }
    }

    /// # Errors
    ///
    /// Returns an error if any timeout or interval is zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.exec.timeout == 0 {
            bail!("exec.timeout must be greater than zero");
        }
        if self.jobs.timeout == 0 {
            bail!("jobs.timeout must be greater than zero");
        }
        if self.jobs.cleanup_interval == 0 {
            bail!("jobs.cleanup_interval must be greater than zero");
        }
        Ok(())
    }
}

fn env_secs(key: &str) -> Option<u64> {
    let v = std::env::var(key).ok()?;
    match v.trim().parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {v}");
            None
        }
    }
}
