//! Store port: the single source of truth for jobs, tasks and results.
//!
//! Every write is a read-modify-write executed inside one critical section.
//! Mutations run against a working copy and are committed only when they
//! return `Ok`, so a refused transition leaves the stored record untouched.

use async_trait::async_trait;

use crate::domain::{
    JobId, JobRecord, ResultId, ResultRecord, TaskId, TaskRecord, TransitionError,
};

pub type JobMutation<'a> =
    Box<dyn FnOnce(&mut JobRecord) -> Result<(), TransitionError> + Send + 'a>;

pub type TaskMutation<'a> =
    Box<dyn FnOnce(&mut TaskRecord) -> Result<(), TransitionError> + Send + 'a>;

/// Applied to each task of a batch; a task whose mutation fails is skipped.
pub type TaskBatchMutation<'a> =
    &'a (dyn Fn(&mut TaskRecord) -> Result<(), TransitionError> + Send + Sync);

/// Decides whether a job may be removed.
pub type JobGuard<'a> = &'a (dyn Fn(&JobRecord) -> Result<(), TransitionError> + Send + Sync);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("task {0} already has a result")]
    DuplicateResult(TaskId),

    #[error(transparent)]
    Rejected(#[from] TransitionError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// A refused state transition, as opposed to a bookkeeping failure.
    pub fn is_rejected(&self) -> bool {
        matches!(self, StoreError::Rejected(_))
    }
}

/// Job, its tasks (expansion order) and its results, read under one lock.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job: JobRecord,
    pub tasks: Vec<TaskRecord>,
    pub results: Vec<ResultRecord>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a job together with its tasks.
    async fn create_job(&self, job: JobRecord, tasks: Vec<TaskRecord>) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// All jobs, oldest first.
    async fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Atomically apply `mutation` and return the updated record.
    async fn update_job(
        &self,
        job_id: JobId,
        mutation: JobMutation<'_>,
    ) -> Result<JobRecord, StoreError>;

    /// Apply `job_mutation` and, if it succeeds, `task_mutation` to every
    /// task of the job, all in one critical section.
    ///
    /// A refused job mutation commits nothing. Tasks whose mutation is
    /// refused are left unchanged and out of the returned list.
    async fn update_job_and_tasks(
        &self,
        job_id: JobId,
        job_mutation: JobMutation<'_>,
        task_mutation: TaskBatchMutation<'_>,
    ) -> Result<(JobRecord, Vec<TaskRecord>), StoreError>;

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Tasks of a job in expansion order.
    async fn list_tasks_for_job(&self, job_id: JobId) -> Result<Vec<TaskRecord>, StoreError>;

    async fn update_task(
        &self,
        task_id: TaskId,
        mutation: TaskMutation<'_>,
    ) -> Result<TaskRecord, StoreError>;

    /// Apply `mutation` to every listed task in one critical section.
    ///
    /// Returns the records that were changed. Unknown ids and tasks whose
    /// mutation is refused are left out.
    async fn update_tasks(
        &self,
        task_ids: &[TaskId],
        mutation: TaskBatchMutation<'_>,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Fails with `DuplicateResult` if the task already has one.
    async fn append_result(&self, result: ResultRecord) -> Result<(), StoreError>;

    /// All-or-nothing variant of `append_result`.
    async fn append_results(&self, results: Vec<ResultRecord>) -> Result<(), StoreError>;

    async fn get_result(&self, result_id: ResultId) -> Result<Option<ResultRecord>, StoreError>;

    async fn result_for_task(&self, task_id: TaskId) -> Result<Option<ResultRecord>, StoreError>;

    /// Results of a job in task expansion order.
    async fn list_results_for_job(&self, job_id: JobId) -> Result<Vec<ResultRecord>, StoreError>;

    async fn job_snapshot(&self, job_id: JobId) -> Result<Option<JobSnapshot>, StoreError>;

    /// Remove a job with its tasks and results if `guard` accepts the
    /// current record. The check and the removal share one critical section.
    /// Returns false if unknown; a refusal is `Rejected`.
    async fn delete_job_if(&self, job_id: JobId, guard: JobGuard<'_>) -> Result<bool, StoreError>;

    /// Unconditional `delete_job_if`.
    async fn delete_job(&self, job_id: JobId) -> Result<bool, StoreError> {
        self.delete_job_if(job_id, &|_: &JobRecord| Ok::<(), TransitionError>(()))
            .await
    }
}
