//! Immutable per-task result snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TaskError;
use super::ids::{JobId, ResultId, TaskId};
use super::outcome::FindingCounts;
use super::task::{TaskRecord, TaskStatus};

/// Written once, when the task reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub result_id: ResultId,
    pub job_id: JobId,
    pub task_id: TaskId,

    pub target: String,
    pub sub_target: u32,
    pub kind: String,

    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,

    pub findings: FindingCounts,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ResultRecord {
    /// Snapshot a terminal task. Returns `None` while the task is still
    /// Pending or Running.
    pub fn from_task(result_id: ResultId, task: &TaskRecord) -> Option<Self> {
        if !task.status.is_terminal() {
            return None;
        }
        let completed_at = task.completed_at?;
        let duration_ms = task
            .started_at
            .map(|started| (completed_at - started).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        Some(Self {
            result_id,
            job_id: task.job_id,
            task_id: task.task_id,
            target: task.target.clone(),
            sub_target: task.sub_target,
            kind: task.kind.clone(),
            status: task.status,
            started_at: task.started_at,
            completed_at,
            duration_ms,
            findings: task
                .report
                .as_ref()
                .map(|r| r.finding_counts())
                .unwrap_or_default(),
            error: task.error.clone(),
            details: task.report.as_ref().map(|r| r.details.clone()),
            reason: task.reason.clone(),
        })
    }
}
