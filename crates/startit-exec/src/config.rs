use std::path::PathBuf;

use serde::Deserialize;

fn default_timeout() -> u64 {
    300
}

/// Execution settings: ad-hoc timeout, shell override, and extra denylist patterns.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub shell: Option<PathBuf>,
    #[serde(default)]
    pub blocked_commands: Vec<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            shell: None,
            blocked_commands: Vec::new(),
        }
    }
}
