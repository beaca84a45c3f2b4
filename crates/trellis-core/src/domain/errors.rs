//! Error taxonomy shared by jobs, tasks and results.
//!
//! These are *recorded* errors (data on a Job or Task), not Rust error types
//! that propagate with `?`. The propagating errors live next to the component
//! that raises them (`StoreError`, `RegistryError`, ...) and are gathered in
//! `crate::error::TrellisError`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operational classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed job spec or analyzer options.
    Validation,
    /// Required analyzer (or the tool behind it) is unavailable.
    Dependency,
    /// Task exceeded its time budget.
    Timeout,
    /// Task aborted because cancellation was requested.
    Cancellation,
    /// The analyzer ran and reported a failure.
    Execution,
    /// Internal bookkeeping failure. Fatal for the job.
    Storage,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Cancellation => "cancellation",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a Job (dependency failures, fatal bookkeeping errors).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Error attached to a Task that ended Failed or TimedOut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub category: ErrorCategory,
    pub message: String,
}

impl TaskError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

/// A state-machine transition that the record refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {entity} transition: {from} -> {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

impl TransitionError {
    pub fn new(entity: &'static str, from: impl fmt::Debug, to: impl fmt::Debug) -> Self {
        Self {
            entity,
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }
}
