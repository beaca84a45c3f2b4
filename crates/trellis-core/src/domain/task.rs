//! Task record and its state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ErrorCategory, TaskError, TransitionError};
use super::ids::{JobId, TaskId};
use super::outcome::AnalysisReport;
use super::spec::TaskCell;

/// Task state.
///
/// State transitions:
/// - Pending -> Running -> Completed | Failed | TimedOut | Cancelled | Skipped
/// - Pending -> Cancelled (cancelled before it was started)
/// - Pending -> Skipped (analyzer unavailable for an optional kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    Skipped,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::TimedOut,
        TaskStatus::Cancelled,
        TaskStatus::Skipped,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Terminal states that make the owning job end Failed.
    pub fn is_failure(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::TimedOut)
    }
}

/// Single source of truth for one task.
///
/// All state changes go through the methods below; each one checks the
/// current state and refuses illegal transitions, leaving the record as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub job_id: JobId,

    /// Index in the job's expansion order.
    pub position: usize,

    pub target: String,
    pub sub_target: u32,
    pub kind: String,
    pub options: serde_json::Value,

    pub status: TaskStatus,

    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// 0-100, best effort, reported by the analyzer.
    pub progress: u8,

    /// Set iff the task ended Failed or TimedOut.
    pub error: Option<TaskError>,

    /// Set iff the task ended Completed.
    pub report: Option<AnalysisReport>,

    /// Why the task was skipped or cancelled.
    pub reason: Option<String>,
}

impl TaskRecord {
    pub fn new(
        task_id: TaskId,
        job_id: JobId,
        position: usize,
        cell: TaskCell,
        options: serde_json::Value,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            job_id,
            position,
            target: cell.target,
            sub_target: cell.sub_target,
            kind: cell.kind,
            options,
            status: TaskStatus::Pending,
            timeout,
            created_at: now,
            started_at: None,
            completed_at: None,
            progress: 0,
            error: None,
            report: None,
            reason: None,
        }
    }

    fn reject(&self, to: TaskStatus) -> TransitionError {
        TransitionError::new("task", self.status, to)
    }

    fn require(&self, allowed: &[TaskStatus], to: TaskStatus) -> Result<(), TransitionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(self.reject(to))
        }
    }

    fn finish(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        // Tasks that never ran still get a start time so that
        // "started_at is set whenever status != Pending" holds.
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
        self.status = status;
    }

    /// Pending -> Running.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(&[TaskStatus::Pending], TaskStatus::Running)?;
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// Running -> Completed.
    pub fn complete(
        &mut self,
        report: AnalysisReport,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(&[TaskStatus::Running], TaskStatus::Completed)?;
        self.progress = 100;
        self.report = Some(report);
        self.finish(TaskStatus::Completed, now);
        Ok(())
    }

    /// Running -> Failed.
    pub fn fail(&mut self, error: TaskError, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(&[TaskStatus::Running], TaskStatus::Failed)?;
        self.error = Some(error);
        self.finish(TaskStatus::Failed, now);
        Ok(())
    }

    /// Running -> TimedOut.
    pub fn time_out(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(&[TaskStatus::Running], TaskStatus::TimedOut)?;
        self.error = Some(TaskError::new(
            ErrorCategory::Timeout,
            format!("task exceeded its timeout of {}s", self.timeout.as_secs_f64()),
        ));
        self.finish(TaskStatus::TimedOut, now);
        Ok(())
    }

    /// Pending | Running -> Cancelled.
    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(
            &[TaskStatus::Pending, TaskStatus::Running],
            TaskStatus::Cancelled,
        )?;
        self.reason = Some(reason.into());
        self.finish(TaskStatus::Cancelled, now);
        Ok(())
    }

    /// Pending -> Cancelled only. Running tasks are left to finish.
    pub fn cancel_pending(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(&[TaskStatus::Pending], TaskStatus::Cancelled)?;
        self.cancel(reason, now)
    }

    /// Pending | Running -> Skipped.
    pub fn skip(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(
            &[TaskStatus::Pending, TaskStatus::Running],
            TaskStatus::Skipped,
        )?;
        self.reason = Some(reason.into());
        self.finish(TaskStatus::Skipped, now);
        Ok(())
    }

    /// Record analyzer progress. Ignored unless the task is running.
    pub fn report_progress(&mut self, percent: u8) -> Result<(), TransitionError> {
        self.require(&[TaskStatus::Running], TaskStatus::Running)?;
        self.progress = percent.min(100);
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
