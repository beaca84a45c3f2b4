//! In-memory store implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{JobId, JobRecord, ResultId, ResultRecord, TaskId, TaskRecord};
use crate::ports::store::{
    JobGuard, JobMutation, JobSnapshot, Store, StoreError, TaskBatchMutation, TaskMutation,
};

/// In-memory store state.
#[derive(Default)]
struct InMemoryStoreState {
    /// ULIDs sort by creation time, so iteration is oldest first.
    jobs: BTreeMap<JobId, JobRecord>,

    tasks: HashMap<TaskId, TaskRecord>,

    results: HashMap<ResultId, ResultRecord>,

    /// At most one result per task.
    result_by_task: HashMap<TaskId, ResultId>,
}

impl InMemoryStoreState {
    fn tasks_of(&self, job: &JobRecord) -> Vec<TaskRecord> {
        job.task_ids
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }

    fn results_of(&self, job: &JobRecord) -> Vec<ResultRecord> {
        job.task_ids
            .iter()
            .filter_map(|id| self.result_by_task.get(id))
            .filter_map(|rid| self.results.get(rid).cloned())
            .collect()
    }

    fn check_result(&self, result: &ResultRecord) -> Result<(), StoreError> {
        if !self.tasks.contains_key(&result.task_id) {
            return Err(StoreError::TaskNotFound(result.task_id));
        }
        if self.result_by_task.contains_key(&result.task_id) {
            return Err(StoreError::DuplicateResult(result.task_id));
        }
        Ok(())
    }

    fn insert_result(&mut self, result: ResultRecord) {
        self.result_by_task.insert(result.task_id, result.result_id);
        self.results.insert(result.result_id, result);
    }
}

/// `Store` backed by hash maps behind one tokio mutex.
///
/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_job(&self, job: JobRecord, tasks: Vec<TaskRecord>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.job_id) {
            return Err(StoreError::DuplicateJob(job.job_id));
        }
        for task in tasks {
            state.tasks.insert(task.task_id, task);
        }
        state.jobs.insert(job.job_id, job);
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.jobs.values().cloned().collect())
    }

    async fn update_job(
        &self,
        job_id: JobId,
        mutation: JobMutation<'_>,
    ) -> Result<JobRecord, StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;
        let mut working = record.clone();
        mutation(&mut working)?;
        *record = working.clone();
        Ok(working)
    }

    async fn update_job_and_tasks(
        &self,
        job_id: JobId,
        job_mutation: JobMutation<'_>,
        task_mutation: TaskBatchMutation<'_>,
    ) -> Result<(JobRecord, Vec<TaskRecord>), StoreError> {
        let mut state = self.state.lock().await;
        let mut job = state
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::JobNotFound(job_id))?;
        job_mutation(&mut job)?;

        let mut changed = Vec::new();
        for task_id in &job.task_ids {
            let Some(record) = state.tasks.get_mut(task_id) else {
                continue;
            };
            let mut working = record.clone();
            if task_mutation(&mut working).is_ok() {
                *record = working.clone();
                changed.push(working);
            }
        }
        state.jobs.insert(job_id, job.clone());
        Ok((job, changed))
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&task_id).cloned())
    }

    async fn list_tasks_for_job(&self, job_id: JobId) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        let job = state.jobs.get(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        Ok(state.tasks_of(job))
    }

    async fn update_task(
        &self,
        task_id: TaskId,
        mutation: TaskMutation<'_>,
    ) -> Result<TaskRecord, StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        let mut working = record.clone();
        mutation(&mut working)?;
        *record = working.clone();
        Ok(working)
    }

    async fn update_tasks(
        &self,
        task_ids: &[TaskId],
        mutation: TaskBatchMutation<'_>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let mut state = self.state.lock().await;
        let mut changed = Vec::new();
        for task_id in task_ids {
            let Some(record) = state.tasks.get_mut(task_id) else {
                continue;
            };
            let mut working = record.clone();
            if mutation(&mut working).is_ok() {
                *record = working.clone();
                changed.push(working);
            }
        }
        Ok(changed)
    }

    async fn append_result(&self, result: ResultRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_result(&result)?;
        state.insert_result(result);
        Ok(())
    }

    async fn append_results(&self, results: Vec<ResultRecord>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut batch = std::collections::HashSet::new();
        for result in &results {
            state.check_result(result)?;
            if !batch.insert(result.task_id) {
                return Err(StoreError::DuplicateResult(result.task_id));
            }
        }
        for result in results {
            state.insert_result(result);
        }
        Ok(())
    }

    async fn get_result(&self, result_id: ResultId) -> Result<Option<ResultRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.results.get(&result_id).cloned())
    }

    async fn result_for_task(&self, task_id: TaskId) -> Result<Option<ResultRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .result_by_task
            .get(&task_id)
            .and_then(|rid| state.results.get(rid))
            .cloned())
    }

    async fn list_results_for_job(&self, job_id: JobId) -> Result<Vec<ResultRecord>, StoreError> {
        let state = self.state.lock().await;
        let job = state.jobs.get(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        Ok(state.results_of(job))
    }

    async fn job_snapshot(&self, job_id: JobId) -> Result<Option<JobSnapshot>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&job_id).map(|job| JobSnapshot {
            job: job.clone(),
            tasks: state.tasks_of(job),
            results: state.results_of(job),
        }))
    }

    async fn delete_job_if(&self, job_id: JobId, guard: JobGuard<'_>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get(&job_id) else {
            return Ok(false);
        };
        guard(job)?;
        let Some(job) = state.jobs.remove(&job_id) else {
            return Ok(false);
        };
        for task_id in &job.task_ids {
            state.tasks.remove(task_id);
            if let Some(result_id) = state.result_by_task.remove(task_id) {
                state.results.remove(&result_id);
            }
        }
        Ok(true)
    }
}
