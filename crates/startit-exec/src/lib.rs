//! Command classification, denylist filtering, and process execution with
//! streaming capture and deadlines.

pub mod classify;
pub mod config;
pub mod error;
pub mod executor;
pub mod process;
pub mod result;
pub mod safety;

pub use classify::{Invocation, classify, discover_shell, is_complex};
pub use config::ExecConfig;
pub use error::{ErrorKind, ExecError};
pub use executor::{CommandExecutor, DEFAULT_TIMEOUT, ExecutionRequest, validate_working_dir};
pub use result::{EXIT_CODE_UNAVAILABLE, ExecutionResult, preview};
pub use safety::SafetyFilter;
pub use tokio_util::sync::CancellationToken;
