//! trellis-core
//!
//! Concurrent batch-job engine: a job is a matrix of
//! (target, sub-target, analysis kind) tasks, run under a per-job worker
//! pool and a global running-jobs cap, with per-task timeouts and
//! cooperative cancellation.
//!
//! # Modules
//! - **domain**: records and value types (ids, spec, job, task, result, outcome, errors)
//! - **ports**: abstractions over infrastructure (Store, Clock, IdGenerator)
//! - **impls**: port implementations (InMemoryStore)
//! - **analyzer**: the Analyzer capability and its registry
//! - **runner**: TaskRunner, one task to a terminal state
//! - **aggregate**: ResultAggregator, job counters and results summary
//! - **scheduler**: job lifecycle, execution loop, dispatcher, config
//! - **app**: EngineBuilder, ControlApi, status views

pub mod aggregate;
pub mod analyzer;
pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod runner;
pub mod scheduler;

pub use aggregate::ResultAggregator;
pub use analyzer::{Analyzer, AnalyzerContext, AnalyzerError, AnalyzerRegistry, ProgressReporter};
pub use app::{ControlApi, EngineBuilder, JobStatusSnapshot};
pub use domain::{JobId, JobSpec, JobStatus, Outcome, TaskId, TaskStatus};
pub use error::TrellisError;
pub use runner::{TaskOutcome, TaskRunner};
pub use scheduler::{Scheduler, SchedulerConfig};
