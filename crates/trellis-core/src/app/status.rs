//! Status views returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::ResultAggregator;
use crate::domain::{
    JobError, JobId, JobProgress, JobRecord, JobSpec, JobStatus, ResultsSummary, TaskId,
    TaskStatus,
};
use crate::ports::JobSnapshot;

/// Serializable view of a job's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub spec: JobSpec,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancellation_requested: bool,
    pub errors: Vec<JobError>,
}

impl From<&JobRecord> for JobView {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            spec: job.spec.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            cancellation_requested: job.cancellation_requested,
            errors: job.errors.clone(),
        }
    }
}

/// Everything `job_status` reports.
///
/// Progress and summary are recomputed from the task and result records, so
/// the view is consistent even between two counter refreshes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub job: JobView,
    pub progress: JobProgress,
    pub results_summary: ResultsSummary,
    pub active_task_count: usize,
    pub active_task_ids: Vec<TaskId>,
}

impl JobStatusSnapshot {
    pub fn from_snapshot(snapshot: &JobSnapshot, aggregator: &ResultAggregator) -> Self {
        let (progress, results_summary) = aggregator.aggregate(snapshot);
        let active_task_ids: Vec<TaskId> = snapshot
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.task_id)
            .collect();
        Self {
            job: JobView::from(&snapshot.job),
            progress,
            results_summary,
            active_task_count: active_task_ids.len(),
            active_task_ids,
        }
    }
}
