//! Dispatcher: starts Queued jobs as running-job permits free up.
//!
//! One background tokio task per scheduler. It sleeps on a `Notify` that is
//! poked whenever a job is queued or a permit is released, and stops on the
//! shutdown signal or when the scheduler itself is gone.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Scheduler, SchedulerInner, StartAttempt};
use crate::domain::JobId;

/// FIFO of Queued jobs.
#[derive(Default)]
pub(crate) struct DispatchQueue {
    jobs: Mutex<VecDeque<JobId>>,
    notify: Notify,
}

impl DispatchQueue {
    pub(crate) async fn push_back(&self, job_id: JobId) {
        let mut jobs = self.jobs.lock().await;
        if !jobs.contains(&job_id) {
            jobs.push_back(job_id);
        }
        drop(jobs);
        self.notify.notify_one();
    }

    async fn push_front(&self, job_id: JobId) {
        self.jobs.lock().await.push_front(job_id);
    }

    async fn pop_front(&self) -> Option<JobId> {
        self.jobs.lock().await.pop_front()
    }

    pub(crate) async fn remove(&self, job_id: JobId) {
        self.jobs.lock().await.retain(|id| *id != job_id);
    }

    pub(crate) async fn snapshot(&self) -> Vec<JobId> {
        self.jobs.lock().await.iter().copied().collect()
    }

    /// Wake the dispatcher. A wake with nobody waiting is remembered.
    pub(crate) fn wake(&self) {
        self.notify.notify_one();
    }
}

/// Dispatcher handle.
/// - `request_shutdown` stops the loop after its current pass
/// - `join` waits for it
pub(crate) struct Dispatcher {
    shutdown_tx: watch::Sender<bool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub(crate) fn spawn(scheduler: Weak<SchedulerInner>, queue: Arc<DispatchQueue>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(dispatch_loop(scheduler, queue, shutdown_rx));
        Self {
            shutdown_tx,
            join: Mutex::new(Some(join)),
        }
    }

    pub(crate) fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) async fn shutdown_and_join(&self) {
        self.request_shutdown();
        if let Some(join) = self.join.lock().await.take() {
            let _ = join.await;
        }
    }
}

async fn dispatch_loop(
    scheduler: Weak<SchedulerInner>,
    queue: Arc<DispatchQueue>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = queue.notify.notified() => {}
        }

        let Some(inner) = scheduler.upgrade() else {
            break;
        };
        drain(Scheduler { inner }, &queue).await;
    }
    debug!("dispatcher stopped");
}

/// Start Queued jobs in FIFO order until the queue is empty or the
/// running-jobs cap is reached.
async fn drain(scheduler: Scheduler, queue: &DispatchQueue) {
    while scheduler.inner.job_permits.available_permits() > 0 {
        let Some(job_id) = queue.pop_front().await else {
            break;
        };
        match scheduler.try_start(job_id).await {
            Ok(StartAttempt::Started) => {
                debug!(job_id = %job_id, "dispatcher started queued job");
            }
            Ok(StartAttempt::NotStartable) => {}
            Ok(StartAttempt::AtCapacity) => {
                queue.push_front(job_id).await;
                break;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "dispatcher failed to start queued job");
            }
        }
    }
}
