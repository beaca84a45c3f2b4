//! TaskRunner: drives one task from Pending to a terminal state, exactly once.
//!
//! The analyzer runs on its own tokio task and is raced against the task
//! timeout. On timeout the analyzer's token is cancelled and the task is
//! abandoned, not killed. Whatever happens, the task ends with
//! `completed_at` set and a `ResultRecord` appended.

use std::sync::Arc;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, AnalyzerContext, AnalyzerError, ProgressReporter};
use crate::domain::{
    ErrorCategory, Outcome, ResultRecord, TaskError, TaskId, TaskRecord, TaskStatus,
    TransitionError,
};
use crate::ports::{Clock, IdGenerator, Store, StoreError};

/// How a `run` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub status: TaskStatus,

    /// False when the analyzer was never invoked (already terminal, or
    /// cancelled before start).
    pub executed: bool,
}

enum Verdict {
    Returned(Result<Result<Outcome, AnalyzerError>, JoinError>),
    TimedOut,
}

#[derive(Clone)]
pub struct TaskRunner {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, clock, ids }
    }

    /// Run one task. Only store failures are returned as errors; everything
    /// the analyzer does ends up recorded on the task.
    pub async fn run(
        &self,
        task_id: TaskId,
        analyzer: Arc<dyn Analyzer>,
        cancel: CancellationToken,
    ) -> Result<TaskOutcome, StoreError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(StoreError::TaskNotFound(task_id))?;

        if task.status.is_terminal() {
            debug!(task_id = %task_id, status = ?task.status, "task already finished, not running");
            return Ok(TaskOutcome {
                task_id,
                status: task.status,
                executed: false,
            });
        }

        if cancel.is_cancelled() {
            let now = self.clock.now();
            let status = self
                .finish(task_id, move |t| t.cancel("job cancelled before the task started", now))
                .await?;
            return Ok(TaskOutcome {
                task_id,
                status,
                executed: false,
            });
        }

        let now = self.clock.now();
        let task = match self
            .store
            .update_task(task_id, Box::new(move |t: &mut TaskRecord| t.start(now)))
            .await
        {
            Ok(task) => task,
            Err(StoreError::Rejected(_)) => {
                // someone else moved it first
                let status = self.current_status(task_id).await?;
                return Ok(TaskOutcome {
                    task_id,
                    status,
                    executed: false,
                });
            }
            Err(e) => return Err(e),
        };

        debug!(
            job_id = %task.job_id,
            task_id = %task_id,
            target = %task.target,
            sub_target = task.sub_target,
            kind = %task.kind,
            "task started"
        );

        let verdict = self.execute(&task, analyzer, &cancel).await?;
        let now = self.clock.now();

        let status = match verdict {
            Verdict::TimedOut => {
                warn!(task_id = %task_id, timeout_secs = task.timeout.as_secs_f64(), "task timed out");
                self.finish(task_id, move |t| t.time_out(now)).await?
            }
            Verdict::Returned(Ok(Ok(outcome))) => match outcome {
                Outcome::Completed(report) => {
                    self.finish(task_id, move |t| t.complete(report, now))
                        .await?
                }
                Outcome::Failed { category, message } => {
                    let error = TaskError::new(category, message);
                    self.finish(task_id, move |t| t.fail(error, now))
                        .await?
                }
                Outcome::Skipped { reason } => {
                    self.finish(task_id, move |t| t.skip(reason, now))
                        .await?
                }
                Outcome::Cancelled => {
                    self.finish(task_id, move |t| t.cancel("analyzer stopped on cancellation", now))
                        .await?
                }
            },
            Verdict::Returned(Ok(Err(AnalyzerError::Cancelled))) => {
                self.finish(task_id, move |t| t.cancel("analyzer stopped on cancellation", now))
                    .await?
            }
            Verdict::Returned(Ok(Err(e))) => {
                let error = TaskError::new(e.category(), e.to_string());
                self.finish(task_id, move |t| t.fail(error, now))
                    .await?
            }
            Verdict::Returned(Err(join_error)) => {
                warn!(task_id = %task_id, error = %join_error, "analyzer panicked");
                let error = TaskError::new(
                    ErrorCategory::Unknown,
                    format!("analyzer panicked: {join_error}"),
                );
                self.finish(task_id, move |t| t.fail(error, now))
                    .await?
            }
        };

        info!(task_id = %task_id, kind = %task.kind, status = ?status, "task finished");
        Ok(TaskOutcome {
            task_id,
            status,
            executed: true,
        })
    }

    /// Spawn the analyzer and wait for it, the timeout, and progress reports.
    async fn execute(
        &self,
        task: &TaskRecord,
        analyzer: Arc<dyn Analyzer>,
        cancel: &CancellationToken,
    ) -> Result<Verdict, StoreError> {
        let token = cancel.child_token();
        let (progress, mut progress_rx) = ProgressReporter::channel();
        let ctx = AnalyzerContext {
            job_id: task.job_id,
            task_id: task.task_id,
            target: task.target.clone(),
            sub_target: task.sub_target,
            options: task.options.clone(),
            cancel_token: token.clone(),
            progress,
        };

        let mut handle = tokio::spawn(async move { analyzer.execute(ctx).await });
        let deadline = tokio::time::sleep(task.timeout);
        tokio::pin!(deadline);
        let mut progress_open = true;

        loop {
            tokio::select! {
                joined = &mut handle => return Ok(Verdict::Returned(joined)),
                _ = &mut deadline => {
                    token.cancel();
                    return Ok(Verdict::TimedOut);
                }
                changed = progress_rx.changed(), if progress_open => {
                    if changed.is_err() {
                        progress_open = false;
                        continue;
                    }
                    let percent = *progress_rx.borrow_and_update();
                    let res = self
                        .store
                        .update_task(
                            task.task_id,
                            Box::new(move |t: &mut TaskRecord| t.report_progress(percent)),
                        )
                        .await;
                    match res {
                        Ok(_) | Err(StoreError::Rejected(_)) => {}
                        Err(e) => {
                            token.cancel();
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Apply a terminal transition and append the task's result snapshot.
    ///
    /// If the transition is refused because the task was finalized
    /// elsewhere, the stored status is returned instead.
    async fn finish<F>(&self, task_id: TaskId, transition: F) -> Result<TaskStatus, StoreError>
    where
        F: FnOnce(&mut TaskRecord) -> Result<(), TransitionError> + Send + 'static,
    {
        let task = match self.store.update_task(task_id, Box::new(transition)).await {
            Ok(task) => task,
            Err(StoreError::Rejected(_)) => return self.current_status(task_id).await,
            Err(e) => return Err(e),
        };
        if let Some(result) = ResultRecord::from_task(self.ids.generate_result_id(), &task) {
            self.store.append_result(result).await?;
        }
        Ok(task.status)
    }

    async fn current_status(&self, task_id: TaskId) -> Result<TaskStatus, StoreError> {
        self.store
            .get_task(task_id)
            .await?
            .map(|t| t.status)
            .ok_or(StoreError::TaskNotFound(task_id))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::{AnalysisReport, Finding, JobId, JobRecord, JobSpec, Severity};
    use crate::impls::InMemoryStore;
    use crate::ports::{FixedClock, UlidGenerator};

    enum Behavior {
        Complete,
        Fail,
        Error(AnalyzerError),
        Panic,
        Hang,
        HonorCancel,
        Skip,
        Progress,
    }

    struct Scripted(Behavior);

    #[async_trait]
    impl Analyzer for Scripted {
        fn kind(&self) -> &str {
            "k1"
        }

        async fn execute(&self, ctx: AnalyzerContext) -> Result<Outcome, AnalyzerError> {
            match &self.0 {
                Behavior::Complete => Ok(Outcome::Completed(
                    AnalysisReport::new(serde_json::json!({"target": ctx.target}))
                        .with_finding(Finding::new(Severity::High, "xss")),
                )),
                Behavior::Fail => Ok(Outcome::failed(ErrorCategory::Execution, "exit code 2")),
                Behavior::Error(e) => Err(e.clone()),
                Behavior::Panic => panic!("analyzer bug"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3_600)).await;
                    Ok(Outcome::completed(serde_json::json!({})))
                }
                Behavior::HonorCancel => {
                    ctx.cancel_token.cancelled().await;
                    Ok(Outcome::Cancelled)
                }
                Behavior::Skip => Ok(Outcome::skipped("no endpoints")),
                Behavior::Progress => {
                    ctx.progress.report(40);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ctx.progress.report(80);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(Outcome::completed(serde_json::json!({})))
                }
            }
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        runner: TaskRunner,
        task_id: TaskId,
    }

    async fn harness(timeout: Duration) -> Harness {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        let store = Arc::new(InMemoryStore::new());

        let spec = JobSpec::new(["t1"], &[1], ["k1"]);
        let job_id = ids.generate_job_id();
        let task_id = ids.generate_task_id();
        let cell = spec.expand().remove(0);
        let task = TaskRecord::new(
            task_id,
            job_id,
            0,
            cell,
            serde_json::json!({}),
            timeout,
            clock.now(),
        );
        let job = JobRecord::new(job_id, spec, vec![task_id], clock.now());
        store.create_job(job, vec![task]).await.unwrap();

        let runner = TaskRunner::new(store.clone(), clock, ids);
        Harness {
            store,
            runner,
            task_id,
        }
    }

    async fn run(h: &Harness, behavior: Behavior) -> TaskOutcome {
        h.runner
            .run(h.task_id, Arc::new(Scripted(behavior)), CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn completed_task_gets_report_and_result() {
        let h = harness(Duration::from_secs(5)).await;
        let outcome = run(&h, Behavior::Complete).await;
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert!(outcome.executed);

        let task = h.store.get_task(h.task_id).await.unwrap().unwrap();
        assert_eq!(task.report.unwrap().details["target"], "t1");
        let result = h.store.result_for_task(h.task_id).await.unwrap().unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.findings.total, 1);
    }

    #[tokio::test]
    async fn failed_outcome_and_error_are_categorized() {
        let h = harness(Duration::from_secs(5)).await;
        assert_eq!(run(&h, Behavior::Fail).await.status, TaskStatus::Failed);
        let task = h.store.get_task(h.task_id).await.unwrap().unwrap();
        assert_eq!(task.error.unwrap().category, ErrorCategory::Execution);

        let h = harness(Duration::from_secs(5)).await;
        let outcome = run(
            &h,
            Behavior::Error(AnalyzerError::InvalidOptions("depth".into())),
        )
        .await;
        assert_eq!(outcome.status, TaskStatus::Failed);
        let result = h.store.result_for_task(h.task_id).await.unwrap().unwrap();
        assert_eq!(result.error.unwrap().category, ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn panic_becomes_unknown_failure() {
        let h = harness(Duration::from_secs(5)).await;
        assert_eq!(run(&h, Behavior::Panic).await.status, TaskStatus::Failed);
        let task = h.store.get_task(h.task_id).await.unwrap().unwrap();
        assert_eq!(task.error.unwrap().category, ErrorCategory::Unknown);
        assert!(h.store.result_for_task(h.task_id).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_analyzer_times_out() {
        let h = harness(Duration::from_secs(2)).await;
        let started = tokio::time::Instant::now();
        let outcome = run(&h, Behavior::Hang).await;

        assert_eq!(outcome.status, TaskStatus::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));

        let task = h.store.get_task(h.task_id).await.unwrap().unwrap();
        assert_eq!(task.error.unwrap().category, ErrorCategory::Timeout);
        assert!(task.completed_at.is_some());
        assert!(h.store.result_for_task(h.task_id).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_the_analyzer_token() {
        let h = harness(Duration::from_secs(1)).await;
        // honors the token but only returns after the deadline fired
        let outcome = run(&h, Behavior::HonorCancel).await;
        assert_eq!(outcome.status, TaskStatus::TimedOut);
    }

    #[tokio::test]
    async fn cancelled_token_means_never_started() {
        let h = harness(Duration::from_secs(5)).await;
        let token = CancellationToken::new();
        token.cancel();
        let outcome = h
            .runner
            .run(h.task_id, Arc::new(Scripted(Behavior::Panic)), token)
            .await
            .unwrap();

        assert_eq!(outcome.status, TaskStatus::Cancelled);
        assert!(!outcome.executed);
        let result = h.store.result_for_task(h.task_id).await.unwrap().unwrap();
        assert_eq!(result.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn cooperative_cancellation_while_running() {
        let h = harness(Duration::from_secs(60)).await;
        let token = CancellationToken::new();
        let runner = h.runner.clone();
        let task_id = h.task_id;
        let job_token = token.clone();
        let handle = tokio::spawn(async move {
            runner
                .run(task_id, Arc::new(Scripted(Behavior::HonorCancel)), job_token)
                .await
        });

        // wait until the task is Running before cancelling
        while h.store.get_task(task_id).await.unwrap().unwrap().status != TaskStatus::Running {
            tokio::task::yield_now().await;
        }
        token.cancel();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn second_run_does_not_execute_again() {
        let h = harness(Duration::from_secs(5)).await;
        run(&h, Behavior::Skip).await;
        let again = run(&h, Behavior::Panic).await;
        assert_eq!(again.status, TaskStatus::Skipped);
        assert!(!again.executed);
        assert_eq!(h.store.list_results_for_job(job_of(&h).await).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_reports_are_persisted() {
        let h = harness(Duration::from_secs(5)).await;
        let outcome = run(&h, Behavior::Progress).await;
        assert_eq!(outcome.status, TaskStatus::Completed);
        // completion always lands at 100
        let task = h.store.get_task(h.task_id).await.unwrap().unwrap();
        assert_eq!(task.progress, 100);
    }

    async fn job_of(h: &Harness) -> JobId {
        h.store.get_task(h.task_id).await.unwrap().unwrap().job_id
    }
}
