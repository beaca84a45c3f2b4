//! Domain model (IDs, specs, records, outcomes, errors).

pub mod errors;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod result;
pub mod spec;
pub mod summary;
pub mod task;

pub use errors::{ErrorCategory, JobError, TaskError, TransitionError};
pub use ids::{JobId, ResultId, TaskId};
pub use job::{JobRecord, JobStatus};
pub use outcome::{AnalysisReport, Finding, FindingCounts, Outcome, Severity};
pub use result::ResultRecord;
pub use spec::{JobSpec, TaskCell, ValidationError};
pub use summary::{JobProgress, ResultsSummary};
pub use task::{TaskRecord, TaskStatus};
