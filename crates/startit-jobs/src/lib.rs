//! Background job registry: submit a command, poll its progress, and let a
//! periodic cleanup cycle reclaim finished jobs.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod job;
pub mod registry;

pub use cleanup::CleanupHandler;
pub use config::JobsConfig;
pub use error::JobError;
pub use job::{JobId, JobSnapshot, JobStatus};
pub use registry::{DEFAULT_CLEANUP_INTERVAL, DEFAULT_JOB_TIMEOUT, DEFAULT_RETENTION, JobRegistry};
