//! Per-job execution loop.
//!
//! Runs on its own tokio task and owns one running-job permit. Tasks are
//! handed to the `TaskRunner` in expansion order through a `JoinSet` capped
//! at `max_concurrent_tasks_per_job`. Cancellation stops new submissions,
//! cancels everything still queued in one batch and lets in-flight tasks
//! drain.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SchedulerInner;
use crate::domain::{
    ErrorCategory, JobError, JobId, JobRecord, JobStatus, TaskId, TaskRecord, TaskStatus,
};
use crate::ports::StoreError;
use crate::runner::TaskOutcome;

enum Prepared {
    /// Tasks may run.
    Ready,
    /// The job already reached a terminal state (missing required analyzer).
    Finished,
}

fn storage(e: StoreError) -> JobError {
    JobError::new(ErrorCategory::Storage, "job bookkeeping failed").with_detail(e.to_string())
}

pub(super) struct JobExecution {
    inner: Arc<SchedulerInner>,
    job_id: JobId,
    token: CancellationToken,
    permit: OwnedSemaphorePermit,
    done: watch::Sender<bool>,
}

impl JobExecution {
    pub(super) fn new(
        inner: Arc<SchedulerInner>,
        job_id: JobId,
        token: CancellationToken,
        permit: OwnedSemaphorePermit,
        done: watch::Sender<bool>,
    ) -> Self {
        Self {
            inner,
            job_id,
            token,
            permit,
            done,
        }
    }

    pub(super) async fn run(self) {
        match self.prepare().await {
            Ok(Prepared::Finished) => {}
            Ok(Prepared::Ready) => {
                let fatal = self.execute().await.err();
                self.finalize(fatal).await;
            }
            Err(fatal) => {
                self.token.cancel();
                if let Err(e) = self.inner.cancel_tasks(&self.pending_task_ids().await, "job aborted").await {
                    warn!(job_id = %self.job_id, error = %e, "could not cancel tasks of aborted job");
                }
                self.finalize(Some(fatal)).await;
            }
        }

        let JobExecution {
            inner,
            job_id,
            permit,
            done,
            ..
        } = self;
        drop(permit);
        let _ = done.send(true);
        inner.release(job_id).await;
    }

    async fn pending_task_ids(&self) -> Vec<TaskId> {
        match self.inner.store.list_tasks_for_job(self.job_id).await {
            Ok(tasks) => tasks
                .into_iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .map(|t| t.task_id)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Dependency check, then Initializing -> Running.
    async fn prepare(&self) -> Result<Prepared, JobError> {
        let inner = &self.inner;
        let job_id = self.job_id;
        let job = inner
            .store
            .get_job(job_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| storage(StoreError::JobNotFound(job_id)))?;
        let tasks = inner.store.list_tasks_for_job(job_id).await.map_err(storage)?;

        let (optional, mandatory): (Vec<_>, Vec<_>) = inner
            .registry
            .check_required(&job.spec)
            .await
            .into_iter()
            .partition(|m| m.optional);

        for dep in &optional {
            warn!(
                job_id = %job_id,
                kind = %dep.kind,
                reason = %dep.reason,
                "optional analyzer unavailable, skipping its tasks"
            );
            let ids: Vec<TaskId> = tasks
                .iter()
                .filter(|t| t.kind == dep.kind)
                .map(|t| t.task_id)
                .collect();
            inner
                .skip_tasks(&ids, &format!("analyzer '{}' unavailable: {}", dep.kind, dep.reason))
                .await
                .map_err(storage)?;
        }

        if !mandatory.is_empty() {
            let kinds = mandatory
                .iter()
                .map(|m| m.kind.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            warn!(job_id = %job_id, kinds = %kinds, "required analyzers unavailable, failing job");

            let ids: Vec<TaskId> = tasks.iter().map(|t| t.task_id).collect();
            inner
                .skip_tasks(&ids, &format!("required analyzer unavailable: {kinds}"))
                .await
                .map_err(storage)?;
            inner.refresh_counters(job_id).await.map_err(storage)?;

            let errors: Vec<JobError> = mandatory
                .into_iter()
                .map(|m| {
                    JobError::new(
                        ErrorCategory::Dependency,
                        format!("analyzer for kind '{}' is unavailable", m.kind),
                    )
                    .with_detail(m.reason)
                })
                .collect();
            let now = inner.clock.now();
            let failed = inner
                .store
                .update_job(
                    job_id,
                    Box::new(move |j: &mut JobRecord| {
                        j.errors.extend(errors);
                        j.transition(JobStatus::Failed, now)
                    }),
                )
                .await;
            return match failed {
                Ok(_) => {
                    info!(job_id = %job_id, status = ?JobStatus::Failed, "job finished");
                    Ok(Prepared::Finished)
                }
                // cancelled while initializing; the loop settles it
                Err(StoreError::Rejected(_)) => Ok(Prepared::Ready),
                Err(e) => Err(storage(e)),
            };
        }

        if !optional.is_empty() {
            inner.refresh_counters(job_id).await.map_err(storage)?;
        }

        let now = inner.clock.now();
        match inner
            .store
            .update_job(job_id, Box::new(move |j: &mut JobRecord| j.mark_running(now)))
            .await
        {
            Ok(_) | Err(StoreError::Rejected(_)) => Ok(Prepared::Ready),
            Err(e) => Err(storage(e)),
        }
    }

    fn fail_fast(&self, fatal: &mut Option<JobError>, error: JobError) {
        error!(
            job_id = %self.job_id,
            category = %error.category,
            message = %error.message,
            detail = ?error.detail,
            "fatal error in execution loop, aborting job"
        );
        fatal.get_or_insert(error);
        self.token.cancel();
    }

    async fn execute(&self) -> Result<(), JobError> {
        let inner = &self.inner;
        let job_id = self.job_id;
        let cap = inner.config.max_concurrent_tasks_per_job;

        let mut queue: VecDeque<TaskRecord> = inner
            .store
            .list_tasks_for_job(job_id)
            .await
            .map_err(storage)?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect();
        let mut in_flight: JoinSet<Result<TaskOutcome, StoreError>> = JoinSet::new();
        let mut fatal: Option<JobError> = None;

        debug!(job_id = %job_id, queued = queue.len(), cap, "execution loop started");

        loop {
            if self.token.is_cancelled() && !queue.is_empty() {
                let ids: Vec<TaskId> = queue.drain(..).map(|t| t.task_id).collect();
                match inner.cancel_tasks(&ids, "job cancelled").await {
                    Ok(n) => {
                        info!(job_id = %job_id, cancelled = n, "queued tasks cancelled");
                        if let Err(e) = inner.refresh_counters(job_id).await {
                            self.fail_fast(&mut fatal, storage(e));
                        }
                    }
                    Err(e) => self.fail_fast(&mut fatal, storage(e)),
                }
            }

            while in_flight.len() < cap && !self.token.is_cancelled() {
                let Some(task) = queue.pop_front() else {
                    break;
                };
                let Some(analyzer) = inner.registry.get(&task.kind) else {
                    let reason = format!("no analyzer registered for kind '{}'", task.kind);
                    if let Err(e) = inner.skip_tasks(&[task.task_id], &reason).await {
                        self.fail_fast(&mut fatal, storage(e));
                    }
                    continue;
                };
                let runner = inner.runner.clone();
                let token = self.token.clone();
                in_flight.spawn(async move { runner.run(task.task_id, analyzer, token).await });
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    match joined {
                        Some(Ok(Ok(outcome))) => {
                            debug!(
                                job_id = %job_id,
                                task_id = %outcome.task_id,
                                status = ?outcome.status,
                                "task settled"
                            );
                        }
                        Some(Ok(Err(e))) => self.fail_fast(&mut fatal, storage(e)),
                        Some(Err(join_error)) => {
                            let error = JobError::new(ErrorCategory::Unknown, "task runner panicked")
                                .with_detail(join_error.to_string());
                            self.fail_fast(&mut fatal, error);
                        }
                        None => {}
                    }
                    if let Err(e) = inner.refresh_counters(job_id).await {
                        self.fail_fast(&mut fatal, storage(e));
                    }
                }
                _ = self.token.cancelled(), if !self.token.is_cancelled() => {
                    info!(job_id = %job_id, in_flight = in_flight.len(), "cancellation observed, draining");
                }
            }
        }

        match fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Refresh counters one last time and settle the terminal status.
    async fn finalize(&self, mut fatal: Option<JobError>) {
        let inner = &self.inner;
        let job_id = self.job_id;

        if let Err(e) = inner.refresh_counters(job_id).await {
            error!(job_id = %job_id, error = %e, "could not refresh counters before finalizing");
            fatal.get_or_insert_with(|| storage(e));
        }

        let now = inner.clock.now();
        let is_fatal = fatal.is_some();
        let finished = inner
            .store
            .update_job(
                job_id,
                Box::new(move |j: &mut JobRecord| {
                    if let Some(error) = fatal {
                        j.record_error(error);
                    }
                    let next = j.final_status(is_fatal);
                    j.transition(next, now)
                }),
            )
            .await;

        match finished {
            Ok(job) => info!(
                job_id = %job_id,
                status = ?job.status,
                completed = job.completed_tasks,
                total = job.total_tasks,
                "job finished"
            ),
            Err(e) => error!(job_id = %job_id, error = %e, "failed to finalize job"),
        }
    }
}
