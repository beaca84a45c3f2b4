//! Job record and status management.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{JobError, TransitionError};
use super::ids::{JobId, TaskId};
use super::spec::JobSpec;
use super::summary::{JobProgress, ResultsSummary};
use super::task::TaskStatus;

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not started.
    Pending,

    /// Start requested while the running-jobs cap was reached.
    Queued,

    /// Dependency check in progress.
    Initializing,

    Running,

    /// Cancellation requested, in-flight tasks draining.
    Cancelling,

    Cancelled,
    Completed,

    /// At least one task failed or timed out, or a mandatory analyzer was missing.
    Failed,

    /// Internal bookkeeping failure.
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Cancelled | JobStatus::Completed | JobStatus::Failed | JobStatus::Error
        )
    }

    /// A job whose execution loop may be alive.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Initializing | JobStatus::Running | JobStatus::Cancelling
        )
    }

    pub fn valid_transitions(self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Pending => &[Queued, Initializing, Cancelled, Error],
            Queued => &[Initializing, Cancelled, Error],
            Initializing => &[Running, Failed, Cancelling, Error],
            Running => &[Cancelling, Completed, Failed, Error],
            Cancelling => &[Cancelled, Error],
            Cancelled | Completed | Failed | Error => &[],
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Single source of truth for a job's metadata and counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub status: JobStatus,

    /// Tasks in expansion order.
    pub task_ids: Vec<TaskId>,

    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub count_by_status: BTreeMap<TaskStatus, usize>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Never goes back to false once set.
    pub cancellation_requested: bool,

    pub results_summary: ResultsSummary,
    pub errors: Vec<JobError>,
}

impl JobRecord {
    pub fn new(job_id: JobId, spec: JobSpec, task_ids: Vec<TaskId>, now: DateTime<Utc>) -> Self {
        let progress = JobProgress::pending(task_ids.len());
        Self {
            job_id,
            spec,
            status: JobStatus::Pending,
            total_tasks: progress.total,
            completed_tasks: 0,
            count_by_status: progress.by_status,
            task_ids,
            created_at: now,
            started_at: None,
            completed_at: None,
            cancellation_requested: false,
            results_summary: ResultsSummary::default(),
            errors: Vec::new(),
        }
    }

    /// Move to `next` if the transition table allows it.
    ///
    /// Entering Initializing stamps `started_at`; entering a terminal state
    /// stamps `completed_at` (and `started_at` for jobs that never started).
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::new("job", self.status, next));
        }
        if next == JobStatus::Initializing {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.started_at.get_or_insert(now);
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_queued(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Queued, now)
    }

    /// Pending | Queued -> Initializing.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Initializing, now)
    }

    /// Initializing -> Running. Refused once cancellation was requested.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.cancellation_requested {
            return Err(TransitionError::new("job", self.status, JobStatus::Running));
        }
        self.transition(JobStatus::Running, now)
    }

    /// Flag the job as cancelled and pick the status that follows.
    ///
    /// Returns the new status: Cancelling for a job that is executing,
    /// Cancelled for one that never started. Terminal jobs are refused.
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> Result<JobStatus, TransitionError> {
        let next = match self.status {
            JobStatus::Pending | JobStatus::Queued => JobStatus::Cancelled,
            JobStatus::Initializing | JobStatus::Running => JobStatus::Cancelling,
            JobStatus::Cancelling => {
                self.cancellation_requested = true;
                return Ok(JobStatus::Cancelling);
            }
            status => return Err(TransitionError::new("job", status, JobStatus::Cancelling)),
        };
        self.transition(next, now)?;
        self.cancellation_requested = true;
        Ok(next)
    }

    pub fn record_error(&mut self, error: JobError) {
        self.errors.push(error);
    }

    /// Overwrite the derived counters with a fresh aggregation.
    pub fn apply_progress(&mut self, progress: JobProgress, summary: ResultsSummary) {
        self.total_tasks = progress.total;
        self.completed_tasks = progress.completed;
        self.count_by_status = progress.by_status;
        self.results_summary = summary;
    }

    /// The terminal status the execution loop should settle on.
    pub fn final_status(&self, fatal: bool) -> JobStatus {
        if fatal {
            JobStatus::Error
        } else if self.cancellation_requested {
            JobStatus::Cancelled
        } else if self.results_summary.has_failures() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn job() -> JobRecord {
        let spec = JobSpec::new(["t1"], &[1, 2], ["k1"]);
        let task_ids = (0..2).map(|_| TaskId::from_ulid(Ulid::new())).collect();
        JobRecord::new(JobId::from_ulid(Ulid::new()), spec, task_ids, now())
    }

    #[test]
    fn new_job_is_pending_with_all_tasks_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_tasks, 2);
        assert_eq!(job.count_by_status[&TaskStatus::Pending], 2);
        assert_eq!(job.count_by_status.values().sum::<usize>(), job.total_tasks);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn begin_stamps_started_at_and_finish_stamps_completed_at() {
        let mut job = job();
        job.begin(now()).unwrap();
        assert!(job.started_at.is_some());
        job.mark_running(now()).unwrap();
        assert!(job.completed_at.is_none());
        job.transition(JobStatus::Completed, now()).unwrap();
        assert!(job.completed_at.is_some());
    }

    #[rstest]
    #[case::pending(JobStatus::Pending, JobStatus::Cancelled)]
    #[case::queued(JobStatus::Queued, JobStatus::Cancelled)]
    #[case::initializing(JobStatus::Initializing, JobStatus::Cancelling)]
    #[case::running(JobStatus::Running, JobStatus::Cancelling)]
    #[case::cancelling(JobStatus::Cancelling, JobStatus::Cancelling)]
    fn request_cancel_moves_to(#[case] from: JobStatus, #[case] expected: JobStatus) {
        let mut job = job();
        job.status = from;
        assert_eq!(job.request_cancel(now()), Ok(expected));
        assert!(job.cancellation_requested);
        assert_eq!(job.status, expected);
    }

    #[rstest]
    #[case::completed(JobStatus::Completed)]
    #[case::failed(JobStatus::Failed)]
    #[case::cancelled(JobStatus::Cancelled)]
    #[case::error(JobStatus::Error)]
    fn terminal_jobs_refuse_everything(#[case] terminal: JobStatus) {
        let mut job = job();
        job.status = terminal;
        assert!(job.request_cancel(now()).is_err());
        assert!(!job.cancellation_requested);
        assert!(job.begin(now()).is_err());
        assert_eq!(job.status, terminal);
    }

    #[test]
    fn never_started_cancel_sets_both_timestamps() {
        let mut job = job();
        job.request_cancel(now()).unwrap();
        assert_eq!(job.started_at, Some(now()));
        assert_eq!(job.completed_at, Some(now()));
    }

    #[test]
    fn cancelled_job_cannot_become_running() {
        let mut job = job();
        job.begin(now()).unwrap();
        job.cancellation_requested = true;
        assert!(job.mark_running(now()).is_err());
        assert_eq!(job.status, JobStatus::Initializing);
    }

    #[test]
    fn running_cannot_go_back_to_pending_states() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Initializing));
        assert!(!JobStatus::Cancelling.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Initializing.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn final_status_precedence() {
        let mut job = job();
        assert_eq!(job.final_status(false), JobStatus::Completed);
        job.results_summary.failed = 1;
        assert_eq!(job.final_status(false), JobStatus::Failed);
        job.cancellation_requested = true;
        assert_eq!(job.final_status(false), JobStatus::Cancelled);
        assert_eq!(job.final_status(true), JobStatus::Error);
    }
}
