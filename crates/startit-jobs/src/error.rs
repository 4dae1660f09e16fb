use crate::job::{JobId, JobStatus};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id} already finished with status {status}")]
    AlreadyFinished { id: JobId, status: JobStatus },
}
