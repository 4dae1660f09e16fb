use std::time::Duration;

use serde::Deserialize;

fn default_timeout() -> u64 {
    600
}

fn default_retention() -> u64 {
    3600
}

fn default_cleanup_interval() -> u64 {
    600
}

/// Background job settings, all in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Deadline applied to every background job.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// How long a finished job stays queryable.
    #[serde(default = "default_retention")]
    pub retention: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl JobsConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retention: default_retention(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}
