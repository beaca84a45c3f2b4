//! ResultAggregator: folds task states and result snapshots into job counters.
//!
//! Pure functions over the current records. Running it twice over the same
//! input gives the same answer, so callers refresh by recomputing.

use std::collections::BTreeMap;

use crate::domain::{
    JobProgress, ResultRecord, ResultsSummary, TaskRecord, TaskStatus,
};
use crate::ports::JobSnapshot;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn progress(&self, tasks: &[TaskRecord]) -> JobProgress {
        let mut by_status: BTreeMap<TaskStatus, usize> =
            TaskStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for task in tasks {
            *by_status.entry(task.status).or_default() += 1;
        }
        let total = tasks.len();
        let completed = tasks.iter().filter(|t| t.status.is_terminal()).count();
        let percent = if total == 0 {
            0.0
        } else {
            // two decimals, stable across calls
            ((completed as f64 * 10_000.0) / total as f64).round() / 100.0
        };
        JobProgress {
            total,
            completed,
            percent,
            by_status,
        }
    }

    pub fn summarize(&self, results: &[ResultRecord]) -> ResultsSummary {
        let mut summary = ResultsSummary::default();
        for result in results {
            match result.status {
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::TimedOut => summary.timed_out += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
                TaskStatus::Skipped => summary.skipped += 1,
                TaskStatus::Pending | TaskStatus::Running => continue,
            }
            summary.findings.merge(&result.findings);
            if let Some(error) = &result.error {
                *summary
                    .failures_by_category
                    .entry(error.category)
                    .or_default() += 1;
            }
        }
        summary
    }

    pub fn aggregate(&self, snapshot: &JobSnapshot) -> (JobProgress, ResultsSummary) {
        (
            self.progress(&snapshot.tasks),
            self.summarize(&snapshot.results),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    use super::*;
    use crate::domain::{
        AnalysisReport, ErrorCategory, Finding, JobId, ResultId, Severity, TaskError, TaskId,
        TaskCell,
    };

    fn task(i: usize) -> TaskRecord {
        TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            JobId::from_ulid(Ulid::new()),
            i,
            TaskCell {
                target: "t".into(),
                sub_target: i as u32,
                kind: "k".into(),
            },
            serde_json::json!({}),
            Duration::from_secs(1),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn tasks() -> Vec<TaskRecord> {
        let now = Utc::now();
        let mut tasks: Vec<TaskRecord> = (0..4).map(task).collect();

        tasks[0].start(now).unwrap();
        tasks[0]
            .complete(
                AnalysisReport::new(serde_json::json!({}))
                    .with_finding(Finding::new(Severity::Critical, "rce"))
                    .with_finding(Finding::new(Severity::Low, "banner")),
                now,
            )
            .unwrap();
        tasks[1].start(now).unwrap();
        tasks[1].time_out(now).unwrap();
        tasks[2].start(now).unwrap();
        tasks[2]
            .fail(TaskError::new(ErrorCategory::Execution, "exit 1"), now)
            .unwrap();
        tasks
    }

    fn results(tasks: &[TaskRecord]) -> Vec<ResultRecord> {
        tasks
            .iter()
            .filter_map(|t| ResultRecord::from_task(ResultId::from_ulid(Ulid::new()), t))
            .collect()
    }

    #[test]
    fn progress_counts_terminal_tasks() {
        let progress = ResultAggregator.progress(&tasks());
        assert_eq!(progress.total, 4);
        assert_eq!(progress.completed, 3);
        assert_eq!(progress.percent, 75.0);
        assert_eq!(progress.count(TaskStatus::Pending), 1);
        assert_eq!(progress.by_status.values().sum::<usize>(), 4);
    }

    #[test]
    fn empty_task_list_is_zero_percent() {
        let progress = ResultAggregator.progress(&[]);
        assert_eq!(progress.total, 0);
        assert_eq!(progress.completed, 0);
        assert_eq!(progress.percent, 0.0);
        assert_eq!(progress.by_status.values().sum::<usize>(), 0);
    }

    #[test]
    fn percent_is_rounded_to_two_decimals() {
        let mut tasks: Vec<TaskRecord> = (0..3).map(task).collect();
        tasks[0].skip("n/a", Utc::now()).unwrap();
        assert_eq!(ResultAggregator.progress(&tasks).percent, 33.33);
    }

    #[test]
    fn summary_counts_outcomes_findings_and_failure_categories() {
        let tasks = tasks();
        let summary = ResultAggregator.summarize(&results(&tasks));

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.findings.total, 2);
        assert_eq!(summary.findings.by_severity[&Severity::Critical], 1);
        assert_eq!(summary.failures_by_category[&ErrorCategory::Timeout], 1);
        assert_eq!(summary.failures_by_category[&ErrorCategory::Execution], 1);
        assert!(summary.has_failures());
    }

    #[test]
    fn reaggregation_does_not_double_count() {
        let tasks = tasks();
        let results = results(&tasks);
        let first = ResultAggregator.summarize(&results);
        let second = ResultAggregator.summarize(&results);
        assert_eq!(first, second);
        assert_eq!(
            ResultAggregator.progress(&tasks),
            ResultAggregator.progress(&tasks)
        );
    }
}
