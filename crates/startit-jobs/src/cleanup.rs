use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use startit_scheduler::{PeriodicTask, Scheduler, SchedulerError, TaskHandler, TaskKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::registry::JobRegistry;

/// Scheduler handler that drops finished jobs older than `retention`.
pub struct CleanupHandler {
    registry: JobRegistry,
    retention: Duration,
}

impl CleanupHandler {
    #[must_use]
    pub fn new(registry: JobRegistry, retention: Duration) -> Self {
        Self {
            registry,
            retention,
        }
    }
}

impl TaskHandler for CleanupHandler {
    fn execute(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let removed = self.registry.cleanup(self.retention);
            tracing::debug!(removed, tracked = self.registry.len(), "job cleanup pass");
        })
    }
}

impl JobRegistry {
    /// Start the periodic cleanup cycle. It runs once immediately, then every
    /// `cleanup_interval`, until `shutdown_rx` turns `true` or its sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidInterval` if the cleanup interval is zero.
    pub fn spawn_cleanup(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, SchedulerError> {
        let task = PeriodicTask::new("job_cleanup", self.cleanup_interval(), TaskKind::JobCleanup)?;
        let mut scheduler = Scheduler::new(shutdown_rx);
        scheduler.add_task(task);
        scheduler.register_handler(
            TaskKind::JobCleanup,
            Box::new(CleanupHandler::new(self.clone(), self.retention())),
        );
        tracing::info!(
            interval_secs = self.cleanup_interval().as_secs(),
            retention_secs = self.retention().as_secs(),
            "job cleanup scheduled"
        );
        Ok(tokio::spawn(async move { scheduler.run().await }))
    }
}
