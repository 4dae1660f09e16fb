use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid interval for task {0}: must be greater than zero")]
    InvalidInterval(String),
}
