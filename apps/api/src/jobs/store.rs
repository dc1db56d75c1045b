//! Persistence seams for job and slide records.
//!
//! `Arc<dyn JobStore>` / `Arc<dyn SlideStore>` are injected into the pipeline
//! and the HTTP layer. Postgres backs deployments; the in-memory store backs
//! the local runner and tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::PersistenceError;
use crate::models::job::{Job, JobStatus};
use crate::models::slide::{NewSlide, Slide};

#[derive(Debug, Clone, Copy, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
}

/// 1-based page of results, newest first.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Page {
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.page_size as u64
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<(), PersistenceError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, PersistenceError>;

    /// Writes `to` only if the current status is in `allowed_from`.
    /// Returns whether the write happened. Sets `started_at` on entering
    /// `processing` and `completed_at` on entering a terminal state.
    async fn transition_status(
        &self,
        id: Uuid,
        allowed_from: &[JobStatus],
        to: JobStatus,
        error_message: Option<&str>,
    ) -> Result<bool, PersistenceError>;

    /// Sets `total_slides` and zeroes `completed_slides`.
    async fn reset_progress(&self, id: Uuid, total: i32) -> Result<(), PersistenceError>;

    /// Absolute progress write. `completed` never decreases and never
    /// exceeds `total`, so repeated or reordered writes converge.
    async fn update_progress(
        &self,
        id: Uuid,
        completed: i32,
        total: i32,
    ) -> Result<(), PersistenceError>;

    /// Moves the job to `completed` and records `key` as its output in one
    /// guarded write. Nothing is written when the status is not in
    /// `allowed_from`.
    async fn complete_with_output(
        &self,
        id: Uuid,
        allowed_from: &[JobStatus],
        key: &str,
    ) -> Result<bool, PersistenceError>;

    /// Replaces the output of a job that is already `completed`.
    /// Returns whether the write happened.
    async fn replace_output(&self, id: Uuid, key: &str) -> Result<bool, PersistenceError>;

    async fn list(&self, filter: JobFilter, page: Page) -> Result<Vec<Job>, PersistenceError>;

    async fn count(&self, filter: JobFilter) -> Result<i64, PersistenceError>;

    /// Removes the job and its slide records. Returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool, PersistenceError>;
}

#[async_trait]
pub trait SlideStore: Send + Sync {
    /// Inserts or replaces the record keyed by `(job_id, slide_number)`.
    async fn upsert(&self, slide: NewSlide) -> Result<Slide, PersistenceError>;

    /// Slides of a job ordered by `slide_number`.
    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<Slide>, PersistenceError>;

    async fn get(&self, job_id: Uuid, slide_number: i32) -> Result<Option<Slide>, PersistenceError>;
}
