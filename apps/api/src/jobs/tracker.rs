//! Job state machine on top of [`JobStore`].
//!
//! Every status write goes through [`JobStatus::allowed_predecessors`], so a
//! terminal job can never be moved back to `processing` by a late writer.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::store::JobStore;
use crate::errors::{PersistenceError, PipelineError, CANCELLED_MESSAGE};
use crate::models::job::{Job, JobStatus};

#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<dyn JobStore>,
}

/// Result of an operator cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyTerminal(JobStatus),
}

impl JobTracker {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    pub async fn get(&self, id: Uuid) -> Result<Job, PersistenceError> {
        self.jobs
            .get(id)
            .await?
            .ok_or(PersistenceError::JobNotFound(id))
    }

    async fn transition(
        &self,
        id: Uuid,
        to: JobStatus,
        error_message: Option<&str>,
    ) -> Result<bool, PersistenceError> {
        let applied = self
            .jobs
            .transition_status(id, to.allowed_predecessors(), to, error_message)
            .await?;
        if !applied {
            warn!("Job {}: rejected status write '{}'", id, to);
        }
        Ok(applied)
    }

    /// Moves the job to `processing`. Fails with [`PipelineError::Cancelled`]
    /// if the job was cancelled before pickup, or with an input error for any
    /// other terminal job.
    pub async fn start(&self, id: Uuid) -> Result<(), PipelineError> {
        if self.transition(id, JobStatus::Processing, None).await? {
            info!("Job {} started", id);
            return Ok(());
        }
        let job = self.get(id).await?;
        if job.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Err(PipelineError::Input(format!(
                "Job {id} is already {}",
                job.status
            )))
        }
    }

    pub async fn begin(&self, id: Uuid, total_slides: usize) -> Result<(), PersistenceError> {
        self.jobs.reset_progress(id, total_slides as i32).await
    }

    pub async fn progress(
        &self,
        id: Uuid,
        completed: usize,
        total: usize,
    ) -> Result<(), PersistenceError> {
        self.jobs
            .update_progress(id, completed as i32, total as i32)
            .await
    }

    /// Marks the job `completed` with its artifact. A rejected transition
    /// leaves the output location untouched.
    pub async fn complete(&self, id: Uuid, output_key: &str) -> Result<bool, PersistenceError> {
        let applied = self
            .jobs
            .complete_with_output(id, JobStatus::Completed.allowed_predecessors(), output_key)
            .await?;
        if applied {
            info!("Job {} completed: {}", id, output_key);
        } else {
            warn!("Job {}: rejected status write '{}'", id, JobStatus::Completed);
        }
        Ok(applied)
    }

    /// Points an already completed job at a freshly assembled artifact.
    pub async fn record_output(&self, id: Uuid, output_key: &str) -> Result<bool, PersistenceError> {
        let applied = self.jobs.replace_output(id, output_key).await?;
        if applied {
            info!("Job {} output replaced: {}", id, output_key);
        } else {
            warn!("Job {}: output not replaced, job is not completed", id);
        }
        Ok(applied)
    }

    pub async fn fail(&self, id: Uuid, message: &str) -> Result<bool, PersistenceError> {
        let applied = self.transition(id, JobStatus::Failed, Some(message)).await?;
        if applied {
            warn!("Job {} failed: {}", id, message);
        }
        Ok(applied)
    }

    /// Marks a non-terminal job `failed` with [`CANCELLED_MESSAGE`].
    /// In-flight generation is not interrupted.
    pub async fn cancel(&self, id: Uuid) -> Result<CancelOutcome, PersistenceError> {
        let job = self.get(id).await?;
        if job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(job.status));
        }
        if self.fail(id, CANCELLED_MESSAGE).await? {
            info!("Job {} cancelled", id);
            Ok(CancelOutcome::Cancelled)
        } else {
            let job = self.get(id).await?;
            Ok(CancelOutcome::AlreadyTerminal(job.status))
        }
    }
}
