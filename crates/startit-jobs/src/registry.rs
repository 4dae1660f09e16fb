use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use startit_exec::{CancellationToken, CommandExecutor, ExecError, ExecutionRequest, preview};

use crate::config::JobsConfig;
use crate::error::JobError;
use crate::job::{Job, JobId, JobSnapshot, JobStatus};

pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Tracks background jobs by id. Cloning shares the same registry.
///
/// Lock order: the map lock may be held while taking a job lock, never the
/// reverse.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    executor: CommandExecutor,
    jobs: RwLock<HashMap<JobId, Arc<Job>>>,
    job_timeout: Duration,
    retention: Duration,
    cleanup_interval: Duration,
    root_cancel: CancellationToken,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Arc<Job>>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Arc<Job>>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, id: &JobId) -> Option<Arc<Job>> {
        self.read().get(id).cloned()
    }
}

impl JobRegistry {
    #[must_use]
    pub fn new(executor: CommandExecutor, config: &JobsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                jobs: RwLock::new(HashMap::new()),
                job_timeout: config.timeout(),
                retention: config.retention(),
                cleanup_interval: config.cleanup_interval(),
                root_cancel: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        self.inner.job_timeout
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        self.inner.retention
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        self.inner.cleanup_interval
    }

    /// Start `command` in `repo_path` as a background job and return its id
    /// without waiting for it. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Empty, denylisted, or unparseable commands and a missing working
    /// directory are rejected here; no job is created for them.
    pub fn submit(&self, command: &str, repo_path: &Path) -> Result<JobId, ExecError> {
        let request = self
            .inner
            .executor
            .request(command)
            .in_dir(repo_path)
            .with_timeout(self.inner.job_timeout);
        self.inner.executor.prepare(&request)?;

        let id = JobId::new();
        let job = Arc::new(Job::new(
            id.clone(),
            command.to_owned(),
            repo_path.to_path_buf(),
            self.inner.root_cancel.child_token(),
        ));
        self.inner.write().insert(id.clone(), Arc::clone(&job));

        tracing::info!(
            job_id = %id,
            command,
            dir = %repo_path.display(),
            "starting background command"
        );
        tokio::spawn(drive(Arc::clone(&self.inner), job, request));
        Ok(id)
    }

    /// Current state of a job, including output captured so far.
    #[must_use]
    pub fn get_status(&self, id: &JobId) -> Option<JobSnapshot> {
        self.inner.lookup(id).map(|job| job.snapshot())
    }

    /// Ids of every tracked job, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<JobId> {
        self.inner.read().keys().cloned().collect()
    }

    /// Drop finished jobs whose end time is more than `older_than` ago.
    /// Returns how many were removed.
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let Some(cutoff) = TimeDelta::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let mut jobs = self.inner.write();
        let before = jobs.len();
        jobs.retain(|id, job| {
            let state = job.state();
            let expired = state.status.is_terminal() && state.ended_at.is_some_and(|end| end < cutoff);
            if expired {
                tracing::debug!(job_id = %id, status = %state.status, "removing finished job");
            }
            !expired
        });
        let removed = before - jobs.len();
        drop(jobs);

        if removed > 0 {
            tracing::info!(removed, "cleaned up finished background commands");
        }
        removed
    }

    /// Request termination of a running or pending job. The job ends `Failed`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `AlreadyFinished` for a terminal job.
    pub fn cancel(&self, id: &JobId) -> Result<(), JobError> {
        let job = self
            .inner
            .lookup(id)
            .ok_or_else(|| JobError::NotFound(id.clone()))?;
        let status = job.state().status;
        if status.is_terminal() {
            return Err(JobError::AlreadyFinished {
                id: id.clone(),
                status,
            });
        }
        tracing::info!(job_id = %id, "cancelling background command");
        job.cancel.cancel();
        Ok(())
    }

    /// Cancel every in-flight job.
    pub fn shutdown(&self) {
        tracing::info!(jobs = self.len(), "shutting down job registry");
        self.inner.root_cancel.cancel();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn drive(inner: Arc<Inner>, job: Arc<Job>, request: ExecutionRequest) {
    let outcome = if job.cancel.is_cancelled() {
        Err(ExecError::Cancelled)
    } else {
        job.mark_running();
        let out_job = Arc::clone(&job);
        let err_job = Arc::clone(&job);
        inner
            .executor
            .run_streaming(
                &request,
                Some(&job.cancel),
                move |line: &str| {
                    tracing::trace!(job_id = %out_job.id, stream = "stdout", "{}", line.trim_end());
                    out_job.append_output(line);
                },
                move |line: &str| {
                    tracing::trace!(job_id = %err_job.id, stream = "stderr", "{}", line.trim_end());
                    err_job.append_error(line);
                },
            )
            .await
    };

    if inner.lookup(&job.id).is_none() {
        tracing::debug!(job_id = %job.id, "job no longer tracked, discarding result");
        return;
    }

    match (job.finish(outcome), job.snapshot()) {
        (Some(JobStatus::Completed), snap) => {
            let exit_code = snap.result.as_ref().map_or(0, |r| r.exit_code);
            tracing::info!(job_id = %job.id, exit_code, "background command completed");
            tracing::debug!(
                job_id = %job.id,
                "output: {}",
                preview(&snap.current_output, 100)
            );
        }
        (Some(JobStatus::Timeout), _) => {
            tracing::info!(
                job_id = %job.id,
                timeout_secs = request.timeout.as_secs(),
                "background command timed out"
            );
        }
        (Some(status), snap) => {
            let exit_code = snap.result.as_ref().map(|r| r.exit_code);
            tracing::info!(
                job_id = %job.id,
                %status,
                ?exit_code,
                error = snap.error.as_deref().unwrap_or(""),
                "background command failed"
            );
        }
        (None, _) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use startit_exec::ExecConfig;
    use tempfile::TempDir;

    use super::*;

    fn registry_with_timeout(timeout: u64) -> JobRegistry {
        let config = JobsConfig {
            timeout,
            ..JobsConfig::default()
        };
        JobRegistry::new(CommandExecutor::new(&ExecConfig::default()), &config)
    }

    fn registry() -> JobRegistry {
        registry_with_timeout(600)
    }

    async fn wait_finished(registry: &JobRegistry, id: &JobId) -> JobSnapshot {
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let snap = registry.get_status(id).expect("job tracked");
            if snap.is_finished() {
                return snap;
            }
            assert!(Instant::now() < deadline, "job {id} did not finish");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn backdate(registry: &JobRegistry, id: &JobId, by: TimeDelta) {
        let job = registry.inner.lookup(id).expect("job tracked");
        let mut state = job.state();
        let end = state.ended_at.expect("finished");
        state.ended_at = Some(end - by);
    }

    #[tokio::test]
    async fn submit_rejects_preconditions_without_creating_jobs() {
        let registry = registry();
        let dir = TempDir::new().unwrap();

        assert!(matches!(
            registry.submit("   ", dir.path()),
            Err(ExecError::EmptyCommand)
        ));
        assert!(matches!(
            registry.submit("rm -rf /", dir.path()),
            Err(ExecError::Blocked { .. })
        ));
        assert!(matches!(
            registry.submit("echo hi", &dir.path().join("missing")),
            Err(ExecError::WorkingDirNotFound { .. })
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_has_no_status() {
        let registry = registry();
        assert!(registry.get_status(&JobId::new()).is_none());
    }

    #[tokio::test]
    async fn completed_job_has_result() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let id = registry.submit("echo hello", dir.path()).unwrap();
        assert_eq!(registry.len(), 1);

        let snap = wait_finished(&registry, &id).await;
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.current_output, "hello\n");
        let result = snap.result.expect("result");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello\n");
        assert!(snap.error.is_none());
        assert!(snap.ended_at.is_some());
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed_with_result() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let id = registry.submit("echo oops >&2; exit 3", dir.path()).unwrap();

        let snap = wait_finished(&registry, &id).await;
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.result.expect("result").exit_code, 3);
        assert_eq!(snap.current_error, "oops\n");
        assert!(snap.error.is_none());
    }

    #[tokio::test]
    async fn start_failure_is_failed_with_error() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let id = registry
            .submit("definitely-not-a-real-program-xyz", dir.path())
            .unwrap();

        let snap = wait_finished(&registry, &id).await;
        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.result.is_none());
        assert!(snap.error.expect("error").contains("failed to start"));
    }

    #[tokio::test]
    async fn polling_finished_job_is_idempotent() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let id = registry.submit("echo once", dir.path()).unwrap();
        let first = wait_finished(&registry, &id).await;
        let second = registry.get_status(&id).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn status_never_regresses_while_polling() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let id = registry.submit("sleep 0.3; echo done", dir.path()).unwrap();

        let mut seen = vec![];
        loop {
            let snap = registry.get_status(&id).unwrap();
            seen.push(snap.status);
            if snap.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for pair in seen.windows(2) {
            assert!(
                pair[0] == pair[1] || pair[0].can_transition_to(pair[1]),
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
        assert_eq!(seen.last(), Some(&JobStatus::Completed));
    }

    #[tokio::test]
    async fn partial_output_visible_while_running() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let id = registry.submit("echo start; sleep 30", dir.path()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let snap = registry.get_status(&id).unwrap();
            if snap.current_output == "start\n" {
                assert_eq!(snap.status, JobStatus::Running);
                break;
            }
            assert!(Instant::now() < deadline, "output never appeared");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        registry.cancel(&id).unwrap();
        wait_finished(&registry, &id).await;
    }

    #[tokio::test]
    async fn job_times_out() {
        let registry = registry_with_timeout(1);
        let dir = TempDir::new().unwrap();
        let id = registry.submit("sleep 30", dir.path()).unwrap();

        let snap = wait_finished(&registry, &id).await;
        assert_eq!(snap.status, JobStatus::Timeout);
        assert!(snap.result.is_none());
        assert_eq!(snap.error.as_deref(), Some("command timed out after 1s"));
        let elapsed = snap.ended_at.unwrap() - snap.started_at;
        assert!(elapsed >= TimeDelta::milliseconds(900), "{elapsed}");
        assert!(elapsed < TimeDelta::seconds(5), "{elapsed}");
    }

    #[tokio::test]
    async fn cancel_running_job() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let id = registry.submit("sleep 30", dir.path()).unwrap();

        registry.cancel(&id).unwrap();
        let snap = wait_finished(&registry, &id).await;
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error.as_deref(), Some("command cancelled"));
        assert!(snap.result.is_none());
    }

    #[tokio::test]
    async fn cancel_unknown_and_finished() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            registry.cancel(&JobId::new()),
            Err(JobError::NotFound(_))
        ));

        let id = registry.submit("echo done", dir.path()).unwrap();
        wait_finished(&registry, &id).await;
        assert!(matches!(
            registry.cancel(&id),
            Err(JobError::AlreadyFinished {
                status: JobStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_jobs() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let a = registry.submit("sleep 30", dir.path()).unwrap();
        let b = registry.submit("sleep 30", dir.path()).unwrap();

        registry.shutdown();
        for id in [a, b] {
            let snap = wait_finished(&registry, &id).await;
            assert_eq!(snap.status, JobStatus::Failed);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_jobs_keep_separate_output() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let a = registry.submit("echo A", dir.path()).unwrap();
        let b = registry.submit("echo B", dir.path()).unwrap();
        assert_ne!(a, b);

        let (snap_a, snap_b) = tokio::join!(wait_finished(&registry, &a), wait_finished(&registry, &b));
        assert_eq!(snap_a.current_output, "A\n");
        assert_eq!(snap_b.current_output, "B\n");
        assert_eq!(snap_a.status, JobStatus::Completed);
        assert_eq!(snap_b.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_finished_jobs() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let old = registry.submit("echo old", dir.path()).unwrap();
        let recent = registry.submit("echo recent", dir.path()).unwrap();
        wait_finished(&registry, &old).await;
        wait_finished(&registry, &recent).await;
        let running = registry.submit("sleep 30", dir.path()).unwrap();

        backdate(&registry, &old, TimeDelta::hours(2));
        backdate(&registry, &recent, TimeDelta::minutes(10));

        assert_eq!(registry.cleanup(DEFAULT_RETENTION), 1);
        assert!(registry.get_status(&old).is_none());
        assert!(registry.get_status(&recent).is_some());
        assert!(registry.get_status(&running).is_some());
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.cleanup(DEFAULT_RETENTION), 0);
        registry.shutdown();
    }

    #[tokio::test]
    async fn cleanup_with_zero_retention_keeps_running_jobs() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let running = registry.submit("sleep 30", dir.path()).unwrap();
        let done = registry.submit("echo done", dir.path()).unwrap();
        wait_finished(&registry, &done).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(registry.cleanup(Duration::ZERO), 1);
        assert_eq!(registry.ids(), vec![running]);
        registry.shutdown();
    }

    #[tokio::test]
    async fn result_discarded_when_job_removed() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let id = registry.submit("sleep 0.2", dir.path()).unwrap();
        let job = registry.inner.lookup(&id).unwrap();
        registry.inner.write().remove(&id);

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(registry.get_status(&id).is_none());
        assert!(job.state().result.is_none());
        assert!(!job.state().status.is_terminal());
    }
}
