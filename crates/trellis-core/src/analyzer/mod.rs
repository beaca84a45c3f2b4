//! Analyzer capability: the only way the engine reaches analysis tools.
//!
//! Concrete analyzers live outside this crate. They receive an
//! `AnalyzerContext` for one (target, sub-target, kind) cell and return an
//! `Outcome`. The engine never interprets analyzer-specific details.

pub mod registry;

pub use registry::{AnalyzerRegistry, MissingDependency, RegistryError};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::{ErrorCategory, JobId, Outcome, TaskId};

/// Errors an analyzer may raise instead of returning an `Outcome`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalyzerError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("analyzer unavailable: {0}")]
    Unavailable(String),

    #[error("analysis failed: {0}")]
    Execution(String),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl AnalyzerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AnalyzerError::InvalidOptions(_) => ErrorCategory::Validation,
            AnalyzerError::Unavailable(_) => ErrorCategory::Dependency,
            AnalyzerError::Execution(_) => ErrorCategory::Execution,
            AnalyzerError::Cancelled => ErrorCategory::Cancellation,
            AnalyzerError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Best-effort progress channel from an analyzer back to its runner.
///
/// Only the latest value is kept; reports made after the runner stopped
/// listening are dropped.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: std::sync::Arc<watch::Sender<u8>>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, watch::Receiver<u8>) {
        let (tx, rx) = watch::channel(0);
        (
            Self {
                tx: std::sync::Arc::new(tx),
            },
            rx,
        )
    }

    /// A reporter nobody listens to.
    pub fn detached() -> Self {
        Self::channel().0
    }

    pub fn report(&self, percent: u8) {
        self.tx.send_replace(percent.min(100));
    }
}

/// Everything an analyzer gets for one task.
#[derive(Debug, Clone)]
pub struct AnalyzerContext {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub target: String,
    pub sub_target: u32,
    pub options: serde_json::Value,

    /// Cancelled when the job is cancelled or the task times out.
    pub cancel_token: CancellationToken,

    pub progress: ProgressReporter,
}

/// A pluggable analysis capability for one kind.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Kind name this analyzer serves (e.g. "security", "performance").
    fn kind(&self) -> &str;

    /// Whether the tool behind this analyzer can run right now.
    async fn check_available(&self) -> Result<(), String> {
        Ok(())
    }

    /// Analyze one cell. Should watch `ctx.cancel_token` if the work is long.
    async fn execute(&self, ctx: AnalyzerContext) -> Result<Outcome, AnalyzerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyzer_errors_map_to_categories() {
        assert_eq!(
            AnalyzerError::InvalidOptions("depth".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            AnalyzerError::Unavailable("semgrep".into()).category(),
            ErrorCategory::Dependency
        );
        assert_eq!(AnalyzerError::Cancelled.category(), ErrorCategory::Cancellation);
        assert_eq!(
            AnalyzerError::Other("?".into()).category(),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn progress_keeps_latest_clamped_value() {
        let (reporter, rx) = ProgressReporter::channel();
        reporter.report(10);
        reporter.report(180);
        assert_eq!(*rx.borrow(), 100);

        // no listener, no panic
        ProgressReporter::detached().report(50);
    }
}
