use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::task::{PeriodicTask, TaskHandler, TaskKind};

const DEFAULT_TICK: Duration = Duration::from_secs(60);

pub struct Scheduler {
    tasks: Vec<PeriodicTask>,
    handlers: HashMap<String, Box<dyn TaskHandler>>,
    last_run: HashMap<String, Instant>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    #[must_use]
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            tasks: Vec::new(),
            handlers: HashMap::new(),
            last_run: HashMap::new(),
            shutdown_rx,
        }
    }

    pub fn add_task(&mut self, task: PeriodicTask) {
        self.tasks.push(task);
    }

    pub fn register_handler(&mut self, kind: TaskKind, handler: Box<dyn TaskHandler>) {
        self.handlers.insert(kind.as_str().to_owned(), handler);
    }

    /// Shortest task interval; tasks are checked this often.
    fn tick_period(&self) -> Duration {
        self.tasks
            .iter()
            .map(|t| t.every)
            .min()
            .unwrap_or(DEFAULT_TICK)
    }

    /// Run until the shutdown signal flips to `true`. The first check happens
    /// immediately, so every task runs once at startup.
    pub async fn run(&mut self) {
        let mut interval = tokio::time::interval(self.tick_period());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                scheduled = interval.tick() => {
                    self.tick(scheduled).await;
                }
                res = self.shutdown_rx.changed() => {
                    if res.is_err() || *self.shutdown_rx.borrow() {
                        tracing::info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run every task due at `scheduled`. Due checks and `last_run` use the
    /// deadline the interval fired for, not the wake-up time.
    async fn tick(&mut self, scheduled: Instant) {
        for task in &self.tasks {
            if !is_task_due(self.last_run.get(&task.name).copied(), task.every, scheduled) {
                continue;
            }
            if let Some(handler) = self.handlers.get(task.kind.as_str()) {
                tracing::debug!(task = %task.name, kind = task.kind.as_str(), "executing task");
                handler.execute().await;
                self.last_run.insert(task.name.clone(), scheduled);
            } else {
                tracing::debug!(task = %task.name, kind = task.kind.as_str(), "no handler registered");
            }
        }
    }
}

/// A task is due when it never ran or its interval has elapsed since the last run.
fn is_task_due(last_run: Option<Instant>, every: Duration, now: Instant) -> bool {
    match last_run {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= every,
    }
}
