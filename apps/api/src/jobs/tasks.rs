//! Thin runners that turn a queued [`Task`] into pipeline calls.
//!
//! Every runner stages its inputs in a fresh temporary directory that is
//! removed when the runner returns, whatever the outcome.

use std::path::Path;

use bytes::Bytes;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::queue::Task;
use crate::errors::PipelineError;
use crate::generation::pipeline::{
    regenerate_slides, run_pipeline, JobWorkspace, PipelineContext, RetryPolicy,
};
use crate::models::job::{Job, JobStatus};
use crate::render::{assemble, SlideSource};
use crate::storage::{file_name, slide_number_from_key};

#[derive(Clone)]
pub struct TaskRunner {
    ctx: PipelineContext,
}

impl TaskRunner {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, task: &Task) -> Result<(), PipelineError> {
        match task {
            Task::GenerateAndConvert { job_id } => self.generate_and_convert(*job_id).await,
            Task::Convert { job_id } => self.rebuild(*job_id).await.map(|_| ()),
            Task::RegenerateSlides {
                job_id,
                slide_numbers,
                instructions,
            } => self
                .regenerate(*job_id, slide_numbers, instructions)
                .await
                .map(|_| ()),
        }
    }

    /// Runs the pipeline with the abort policy, then converts. Any failure
    /// marks the job `failed` with the error text.
    pub async fn generate_and_convert(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let result = self.try_generate_and_convert(job_id).await;
        if let Err(e) = &result {
            if !matches!(e, PipelineError::Cancelled) {
                self.ctx.tracker().fail(job_id, &e.to_string()).await?;
            }
        }
        result
    }

    async fn try_generate_and_convert(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let job = self.ctx.tracker().get(job_id).await?;
        let workdir = scratch_dir()?;
        let workspace = self.stage_input(&job, workdir.path()).await?;

        let outcome = run_pipeline(
            &self.ctx,
            job_id,
            &job.config,
            &workspace,
            RetryPolicy::abort_on_failure(),
        )
        .await?;
        info!(
            "Job {}: generation finished, {}/{} slides",
            job_id, outcome.published, outcome.total_slides
        );

        self.convert(job_id).await?;
        Ok(())
    }

    /// Reassembles the artifact of a completed job, e.g. after slides were
    /// regenerated.
    pub async fn rebuild(&self, job_id: Uuid) -> Result<String, PipelineError> {
        let job = self.ctx.tracker().get(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(PipelineError::Input(format!(
                "Job {job_id} is {}, only completed jobs can be rebuilt",
                job.status
            )));
        }
        self.convert(job_id).await
    }

    /// Assembles the stored slide markup into the job's output format and
    /// completes the job. Accepts a `processing` job handed over by the
    /// pipeline or a `completed` job being rebuilt.
    pub async fn convert(&self, job_id: Uuid) -> Result<String, PipelineError> {
        let tracker = self.ctx.tracker();
        let job = tracker.get(job_id).await?;
        if job.is_cancelled() {
            info!("Job {} was cancelled, skipping conversion", job_id);
            return Err(PipelineError::Cancelled);
        }
        let rebuilding = job.status == JobStatus::Completed;
        if !rebuilding && !job.status.can_transition_to(JobStatus::Completed) {
            return Err(PipelineError::Input(format!(
                "Job {job_id} is {}, nothing to convert",
                job.status
            )));
        }

        let sources = self.load_slides(job_id).await?;
        let format = job.config.output_format;
        let canvas = (
            f64::from(job.config.slide_width),
            f64::from(job.config.slide_height),
        );
        info!(
            "Job {}: assembling {} slides into {}",
            job_id,
            sources.len(),
            format.extension()
        );

        let artifact = tokio::task::spawn_blocking(move || assemble(&sources, format, canvas))
            .await
            .map_err(|e| PipelineError::Conversion(format!("assembly task failed: {e}")))?
            .map_err(|e| PipelineError::Conversion(e.to_string()))?;
        if artifact.is_empty() {
            return Err(PipelineError::Conversion(
                "assembler produced an empty document".to_string(),
            ));
        }

        let key = self
            .ctx
            .keys
            .output_key(job_id, Utc::now().date_naive(), format.extension());
        self.ctx
            .storage
            .put(&key, Bytes::from(artifact), format.content_type())
            .await?;

        let applied = if rebuilding {
            tracker.record_output(job_id, &key).await?
        } else {
            tracker.complete(job_id, &key).await?
        };
        if !applied {
            // the job moved on (cancelled or failed) while assembling
            if let Err(e) = self.ctx.storage.delete(&key).await {
                warn!("Job {}: could not delete orphaned {}: {}", job_id, key, e);
            }
            let job = tracker.get(job_id).await?;
            if job.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            return Err(PipelineError::Conversion(format!(
                "Job {job_id} is {}, output discarded",
                job.status
            )));
        }
        Ok(key)
    }

    /// Rewrites the given slides. Job status is not touched and the artifact
    /// is not rebuilt; queue a [`Task::Convert`] for that.
    pub async fn regenerate(
        &self,
        job_id: Uuid,
        slide_numbers: &[usize],
        instructions: &str,
    ) -> Result<Vec<usize>, PipelineError> {
        let job = self.ctx.tracker().get(job_id).await?;
        let workdir = scratch_dir()?;
        let workspace = self.stage_input(&job, workdir.path()).await?;

        let rewritten = regenerate_slides(
            &self.ctx,
            job_id,
            &job.config,
            &workspace,
            slide_numbers,
            instructions,
        )
        .await?;
        if rewritten.len() < slide_numbers.len() {
            warn!(
                "Job {}: regenerated {} of {} requested slides",
                job_id,
                rewritten.len(),
                slide_numbers.len()
            );
        }
        Ok(rewritten)
    }

    /// Downloads the job's source into `<root>/input/`.
    async fn stage_input(&self, job: &Job, root: &Path) -> Result<JobWorkspace, PipelineError> {
        let body = self.ctx.storage.get(&job.input_key).await?;
        let name = file_name(&job.input_key).to_string();
        let input_dir = root.join("input");

        tokio::fs::create_dir_all(&input_dir)
            .await
            .map_err(|e| PipelineError::Input(format!("Cannot create input folder: {e}")))?;
        tokio::fs::write(input_dir.join(&name), &body)
            .await
            .map_err(|e| PipelineError::Input(format!("Cannot stage {name}: {e}")))?;

        Ok(JobWorkspace::new(root, name))
    }

    async fn load_slides(&self, job_id: Uuid) -> Result<Vec<SlideSource>, PipelineError> {
        let keys = self
            .ctx
            .storage
            .list(&self.ctx.keys.slides_prefix(job_id))
            .await?;
        let mut numbered: Vec<(usize, String)> = keys
            .into_iter()
            .filter_map(|k| slide_number_from_key(&k).map(|n| (n, k)))
            .collect();
        numbered.sort_by_key(|(n, _)| *n);

        if numbered.is_empty() {
            return Err(PipelineError::Conversion(
                "No slide markup found for job".to_string(),
            ));
        }

        let mut sources = Vec::with_capacity(numbered.len());
        for (number, key) in numbered {
            let body = self.ctx.storage.get(&key).await?;
            sources.push(SlideSource {
                number,
                markup: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(sources)
    }
}

fn scratch_dir() -> Result<tempfile::TempDir, PipelineError> {
    tempfile::Builder::new()
        .prefix("deckgen-")
        .tempdir()
        .map_err(|e| PipelineError::Input(format!("Cannot create work directory: {e}")))
}
