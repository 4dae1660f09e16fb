use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    JobCleanup,
}

impl TaskKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobCleanup => "job_cleanup",
        }
    }
}

/// A task that should run once every `every`.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    pub name: String,
    pub every: Duration,
    pub kind: TaskKind,
}

impl PeriodicTask {
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidInterval` if `every` is zero.
    pub fn new(
        name: impl Into<String>,
        every: Duration,
        kind: TaskKind,
    ) -> Result<Self, SchedulerError> {
        let name = name.into();
        if every.is_zero() {
            return Err(SchedulerError::InvalidInterval(name));
        }
        Ok(Self { name, every, kind })
    }
}

pub trait TaskHandler: Send + Sync {
    fn execute(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
