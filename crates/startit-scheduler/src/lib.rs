//! Interval-based periodic task scheduler with a shutdown signal.

mod error;
mod scheduler;
mod task;

pub use error::SchedulerError;
pub use scheduler::Scheduler;
pub use task::{PeriodicTask, TaskHandler, TaskKind};
