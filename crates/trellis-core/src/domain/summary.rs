//! Derived views of a job: progress counters and the results summary.
//!
//! Both are recomputed from scratch by `aggregate::ResultAggregator`, never
//! incremented in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::ErrorCategory;
use super::outcome::FindingCounts;
use super::task::TaskStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: usize,

    /// Tasks in a terminal state.
    pub completed: usize,

    pub percent: f64,

    /// Every `TaskStatus` is present, zero-filled.
    pub by_status: BTreeMap<TaskStatus, usize>,
}

impl JobProgress {
    /// All `total` tasks pending.
    pub fn pending(total: usize) -> Self {
        let mut by_status: BTreeMap<TaskStatus, usize> =
            TaskStatus::ALL.iter().map(|s| (*s, 0)).collect();
        by_status.insert(TaskStatus::Pending, total);
        Self {
            total,
            completed: 0,
            percent: 0.0,
            by_status,
        }
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }
}

/// Roll-up of what the finished tasks of a job produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub findings: FindingCounts,

    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub skipped: usize,

    pub failures_by_category: BTreeMap<ErrorCategory, usize>,
}

impl ResultsSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.timed_out > 0
    }
}
