//! Control and status API with serializable responses.
//!
//! Thin layer over `Scheduler` for a transport (HTTP, CLI) to sit on.

use serde::{Deserialize, Serialize};

use super::status::JobStatusSnapshot;
use crate::domain::{JobId, JobSpec, ResultRecord};
use crate::error::TrellisError;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub total_tasks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Clone)]
pub struct ControlApi {
    scheduler: Scheduler,
}

impl ControlApi {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn submit_job(&self, spec: JobSpec) -> Result<SubmitResponse, TrellisError> {
        let job_id = self.scheduler.submit_job(spec).await?;
        let total_tasks = self
            .scheduler
            .get_job(job_id)
            .await?
            .map(|j| j.total_tasks)
            .ok_or(TrellisError::JobNotFound(job_id))?;
        Ok(SubmitResponse {
            job_id,
            total_tasks,
        })
    }

    pub async fn start_job(&self, job_id: JobId) -> Result<StartResponse, TrellisError> {
        Ok(StartResponse {
            started: self.scheduler.start_job(job_id).await?,
        })
    }

    pub async fn cancel_job(&self, job_id: JobId) -> Result<CancelResponse, TrellisError> {
        Ok(CancelResponse {
            cancelled: self.scheduler.cancel_job(job_id).await?,
        })
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatusSnapshot, TrellisError> {
        self.scheduler
            .get_job_status(job_id)
            .await?
            .ok_or(TrellisError::JobNotFound(job_id))
    }

    pub async fn delete_job(&self, job_id: JobId) -> Result<DeleteResponse, TrellisError> {
        Ok(DeleteResponse {
            deleted: self.scheduler.delete_job(job_id).await?,
        })
    }

    pub async fn job_results(&self, job_id: JobId) -> Result<Vec<ResultRecord>, TrellisError> {
        if self.scheduler.get_job(job_id).await?.is_none() {
            return Err(TrellisError::JobNotFound(job_id));
        }
        self.scheduler.job_results(job_id).await
    }
}
