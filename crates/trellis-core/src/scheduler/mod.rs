//! Scheduler: job lifecycle, running-jobs cap and cancellation.
//!
//! `Scheduler` is a cheap, cloneable handle. Each started job gets its own
//! tokio task (see `execution`) that owns one running-job permit until the
//! job is finalized. Jobs started while every permit is taken are Queued and
//! picked up in FIFO order by the `dispatcher`.

pub mod config;
mod dispatcher;
mod execution;


pub use config::{ConfigError, SchedulerConfig};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use self::dispatcher::{DispatchQueue, Dispatcher};
use self::execution::JobExecution;
use crate::aggregate::ResultAggregator;
use crate::analyzer::AnalyzerRegistry;
use crate::app::status::JobStatusSnapshot;
use crate::domain::{
    JobId, JobRecord, JobSpec, JobStatus, ResultRecord, TaskId, TaskRecord, TaskStatus,
    TransitionError,
};
use crate::error::TrellisError;
use crate::ports::{Clock, IdGenerator, Store, StoreError};
use crate::runner::TaskRunner;

/// Result of one attempt to move a job out of Pending/Queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartAttempt {
    Started,
    /// Unknown, already started, terminal, or cancelled concurrently.
    NotStartable,
    /// Every running-job permit is taken; the job is (or stays) Queued.
    AtCapacity,
}

/// Bookkeeping for a job whose execution loop is alive.
struct ActiveJob {
    token: CancellationToken,
    done: watch::Receiver<bool>,
}

pub(crate) struct SchedulerInner {
    pub(crate) config: SchedulerConfig,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) registry: Arc<AnalyzerRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) runner: TaskRunner,
    pub(crate) aggregator: ResultAggregator,
    pub(crate) job_permits: Arc<Semaphore>,
    active: Mutex<HashMap<JobId, ActiveJob>>,
    queue: Arc<DispatchQueue>,
    dispatcher: std::sync::OnceLock<Dispatcher>,
}

#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Build a scheduler and spawn its dispatcher. Must be called from
    /// within a tokio runtime.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn Store>,
        registry: Arc<AnalyzerRegistry>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let runner = TaskRunner::new(store.clone(), clock.clone(), ids.clone());
        let inner = Arc::new(SchedulerInner {
            job_permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            store,
            registry,
            clock,
            ids,
            runner,
            aggregator: ResultAggregator,
            active: Mutex::new(HashMap::new()),
            queue: Arc::new(DispatchQueue::default()),
            dispatcher: std::sync::OnceLock::new(),
        });
        let dispatcher = Dispatcher::spawn(Arc::downgrade(&inner), inner.queue.clone());
        // freshly created, nobody else can have set it
        let _ = inner.dispatcher.set(dispatcher);
        Ok(Self { inner })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &AnalyzerRegistry {
        &self.inner.registry
    }

    /// Validate and expand `spec`, then store the job and all its tasks as
    /// Pending.
    pub async fn submit_job(&self, spec: JobSpec) -> Result<JobId, TrellisError> {
        spec.validate()?;
        let inner = &self.inner;
        let now = inner.clock.now();
        let job_id = inner.ids.generate_job_id();

        let tasks: Vec<TaskRecord> = spec
            .expand()
            .into_iter()
            .enumerate()
            .map(|(position, cell)| {
                let options = spec.options_for(&cell.kind);
                let timeout = inner.config.timeout_for(&cell.kind, spec.task_timeout_secs);
                TaskRecord::new(
                    inner.ids.generate_task_id(),
                    job_id,
                    position,
                    cell,
                    options,
                    timeout,
                    now,
                )
            })
            .collect();
        let task_ids = tasks.iter().map(|t| t.task_id).collect();
        let job = JobRecord::new(job_id, spec, task_ids, now);
        let total_tasks = job.total_tasks;

        inner.store.create_job(job, tasks).await?;
        info!(job_id = %job_id, total_tasks, "job submitted");
        Ok(job_id)
    }

    /// Start a Pending (or Queued) job.
    ///
    /// Returns false when the job is unknown, already started or finished,
    /// or when the running-jobs cap is reached; in the last case the job is
    /// left Queued and started later by the dispatcher. Never waits for the
    /// job's tasks.
    pub async fn start_job(&self, job_id: JobId) -> Result<bool, TrellisError> {
        Ok(self.try_start(job_id).await? == StartAttempt::Started)
    }

    pub(crate) async fn try_start(&self, job_id: JobId) -> Result<StartAttempt, TrellisError> {
        let inner = &self.inner;
        let Some(job) = inner.store.get_job(job_id).await? else {
            return Ok(StartAttempt::NotStartable);
        };
        if !matches!(job.status, JobStatus::Pending | JobStatus::Queued) {
            return Ok(StartAttempt::NotStartable);
        }

        let Ok(permit) = inner.job_permits.clone().try_acquire_owned() else {
            if job.status == JobStatus::Pending {
                let now = inner.clock.now();
                match inner
                    .store
                    .update_job(job_id, Box::new(move |j: &mut JobRecord| j.mark_queued(now)))
                    .await
                {
                    Ok(_) => {
                        inner.queue.push_back(job_id).await;
                        info!(job_id = %job_id, "running-jobs cap reached, job queued");
                    }
                    Err(StoreError::Rejected(_)) => return Ok(StartAttempt::NotStartable),
                    Err(e) => return Err(e.into()),
                }
            }
            return Ok(StartAttempt::AtCapacity);
        };

        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut active = inner.active.lock().await;
            if active.contains_key(&job_id) {
                drop(active);
                drop(permit);
                inner.queue.wake();
                return Ok(StartAttempt::NotStartable);
            }
            active.insert(
                job_id,
                ActiveJob {
                    token: token.clone(),
                    done: done_rx,
                },
            );
        }

        let now = inner.clock.now();
        let begun = inner
            .store
            .update_job(job_id, Box::new(move |j: &mut JobRecord| j.begin(now)))
            .await;
        if let Err(e) = begun {
            inner.active.lock().await.remove(&job_id);
            drop(permit);
            inner.queue.wake();
            return match e {
                StoreError::Rejected(_) | StoreError::JobNotFound(_) => {
                    Ok(StartAttempt::NotStartable)
                }
                e => Err(e.into()),
            };
        }
        inner.queue.remove(job_id).await;

        info!(job_id = %job_id, "job started");
        let execution = JobExecution::new(self.inner.clone(), job_id, token, permit, done_tx);
        tokio::spawn(execution.run());
        Ok(StartAttempt::Started)
    }

    /// Request cancellation.
    ///
    /// Returns false when the job is unknown or already finished. The flag
    /// is set and every Pending task is cancelled in one store update, so no
    /// task can start once this returns true. A job that never started is
    /// finalized as Cancelled right away; a started one moves to Cancelling
    /// and its loop lets the running tasks drain.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<bool, TrellisError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let (updated, cancelled) = match inner
            .store
            .update_job_and_tasks(
                job_id,
                Box::new(move |j: &mut JobRecord| j.request_cancel(now).map(|_| ())),
                &move |t: &mut TaskRecord| t.cancel_pending("job cancelled", now),
            )
            .await
        {
            Ok(changed) => changed,
            Err(StoreError::JobNotFound(_)) | Err(StoreError::Rejected(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        info!(
            job_id = %job_id,
            status = ?updated.status,
            cancelled_tasks = cancelled.len(),
            "job cancellation requested"
        );
        inner.append_results_for(&cancelled).await?;
        if updated.status == JobStatus::Cancelled {
            inner.queue.remove(job_id).await;
            inner.refresh_counters(job_id).await?;
        } else if let Some(active) = inner.active.lock().await.get(&job_id) {
            active.token.cancel();
        }
        Ok(true)
    }

    /// Point-in-time status. Read-only; calling it twice without progress in
    /// between gives equal answers.
    pub async fn get_job_status(
        &self,
        job_id: JobId,
    ) -> Result<Option<JobStatusSnapshot>, TrellisError> {
        let snapshot = self.inner.store.job_snapshot(job_id).await?;
        Ok(snapshot.map(|s| JobStatusSnapshot::from_snapshot(&s, &self.inner.aggregator)))
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, TrellisError> {
        Ok(self.inner.store.get_job(job_id).await?)
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>, TrellisError> {
        Ok(self.inner.store.list_jobs().await?)
    }

    pub async fn job_results(&self, job_id: JobId) -> Result<Vec<ResultRecord>, TrellisError> {
        Ok(self.inner.store.list_results_for_job(job_id).await?)
    }

    /// Remove a job with its tasks and results. Active jobs are refused.
    pub async fn delete_job(&self, job_id: JobId) -> Result<bool, TrellisError> {
        let inner = &self.inner;
        let guard = |j: &JobRecord| {
            if j.status.is_active() {
                Err(TransitionError::new("job", j.status, "deleted"))
            } else {
                Ok(())
            }
        };
        let deleted = match inner.store.delete_job_if(job_id, &guard).await {
            Ok(deleted) => deleted,
            Err(StoreError::Rejected(_)) => return Err(TrellisError::JobActive(job_id)),
            Err(e) => return Err(e.into()),
        };
        if deleted {
            inner.queue.remove(job_id).await;
            info!(job_id = %job_id, "job deleted");
        }
        Ok(deleted)
    }

    /// Wait until the execution loop of `job_id` has finished, then return
    /// the job. Returns immediately for jobs that are not active.
    pub async fn wait_for_job(&self, job_id: JobId) -> Result<Option<JobRecord>, TrellisError> {
        let done = self
            .inner
            .active
            .lock()
            .await
            .get(&job_id)
            .map(|a| a.done.clone());
        if let Some(mut done) = done {
            // sender dropped means the loop is gone either way
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.get_job(job_id).await
    }

    /// Stop the dispatcher, cancel queued and active jobs, and wait for every
    /// execution loop to finish.
    pub async fn shutdown(&self) -> Result<(), TrellisError> {
        let inner = &self.inner;
        if let Some(dispatcher) = inner.dispatcher.get() {
            dispatcher.shutdown_and_join().await;
        }

        for job_id in inner.queue.snapshot().await {
            self.cancel_job(job_id).await?;
        }
        let active: Vec<JobId> = inner.active.lock().await.keys().copied().collect();
        for job_id in &active {
            self.cancel_job(*job_id).await?;
        }
        for job_id in active {
            self.wait_for_job(job_id).await?;
        }
        info!("scheduler shut down");
        Ok(())
    }
}

impl SchedulerInner {
    /// Cancel every listed task that has not started, with its result.
    pub(crate) async fn cancel_tasks(
        &self,
        task_ids: &[TaskId],
        reason: &str,
    ) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let reason = reason.to_string();
        let changed = self
            .store
            .update_tasks(task_ids, &move |t: &mut TaskRecord| {
                t.cancel_pending(reason.clone(), now)
            })
            .await?;
        self.append_results_for(&changed).await?;
        Ok(changed.len())
    }

    /// Skip every listed task that has not started, with its result.
    pub(crate) async fn skip_tasks(
        &self,
        task_ids: &[TaskId],
        reason: &str,
    ) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let reason = reason.to_string();
        let changed = self
            .store
            .update_tasks(task_ids, &move |t: &mut TaskRecord| {
                if t.status != TaskStatus::Pending {
                    return Err(TransitionError::new(
                        "task",
                        t.status,
                        TaskStatus::Skipped,
                    ));
                }
                t.skip(reason.clone(), now)
            })
            .await?;
        self.append_results_for(&changed).await?;
        Ok(changed.len())
    }

    async fn append_results_for(&self, tasks: &[TaskRecord]) -> Result<(), StoreError> {
        let results: Vec<ResultRecord> = tasks
            .iter()
            .filter_map(|t| ResultRecord::from_task(self.ids.generate_result_id(), t))
            .collect();
        if results.is_empty() {
            return Ok(());
        }
        self.store.append_results(results).await
    }

    /// Recompute the job's counters and summary from its current records.
    pub(crate) async fn refresh_counters(&self, job_id: JobId) -> Result<JobRecord, StoreError> {
        let snapshot = self
            .store
            .job_snapshot(job_id)
            .await?
            .ok_or(StoreError::JobNotFound(job_id))?;
        let (progress, summary) = self.aggregator.aggregate(&snapshot);
        self.store
            .update_job(
                job_id,
                Box::new(move |j: &mut JobRecord| {
                    j.apply_progress(progress, summary);
                    Ok::<(), TransitionError>(())
                }),
            )
            .await
    }

    /// Drop the active entry of a finished job and let the dispatcher know a
    /// permit is free.
    async fn release(&self, job_id: JobId) {
        if self.active.lock().await.remove(&job_id).is_none() {
            warn!(job_id = %job_id, "released a job that was not active");
        }
        self.queue.wake();
    }
}
