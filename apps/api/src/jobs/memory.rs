use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{JobFilter, JobStore, Page, SlideStore};
use crate::errors::PersistenceError;
use crate::models::job::{Job, JobStatus};
use crate::models::slide::{NewSlide, Slide};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    slides: BTreeMap<(Uuid, i32), Slide>,
}

/// Job and slide records held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: &Job) -> Result<(), PersistenceError> {
        self.state.lock().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, PersistenceError> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        allowed_from: &[JobStatus],
        to: JobStatus,
        error_message: Option<&str>,
    ) -> Result<bool, PersistenceError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(PersistenceError::JobNotFound(id))?;

        if !allowed_from.contains(&job.status) {
            return Ok(false);
        }

        let now = Utc::now();
        job.status = to;
        job.updated_at = Some(now);
        if let Some(message) = error_message {
            job.error_message = Some(message.to_string());
        }
        if to == JobStatus::Processing && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if to.is_terminal() {
            job.completed_at = Some(now);
        }
        Ok(true)
    }

    async fn reset_progress(&self, id: Uuid, total: i32) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(PersistenceError::JobNotFound(id))?;
        job.total_slides = total.max(0);
        job.completed_slides = 0;
        job.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn update_progress(
        &self,
        id: Uuid,
        completed: i32,
        total: i32,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(PersistenceError::JobNotFound(id))?;
        job.total_slides = total.max(0);
        job.completed_slides = job.completed_slides.max(completed).min(job.total_slides);
        job.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn complete_with_output(
        &self,
        id: Uuid,
        allowed_from: &[JobStatus],
        key: &str,
    ) -> Result<bool, PersistenceError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(PersistenceError::JobNotFound(id))?;

        if !allowed_from.contains(&job.status) {
            return Ok(false);
        }

        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.output_key = Some(key.to_string());
        job.updated_at = Some(now);
        job.completed_at = Some(now);
        Ok(true)
    }

    async fn replace_output(&self, id: Uuid, key: &str) -> Result<bool, PersistenceError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(PersistenceError::JobNotFound(id))?;

        if job.status != JobStatus::Completed {
            return Ok(false);
        }
        job.output_key = Some(key.to_string());
        job.updated_at = Some(Utc::now());
        Ok(true)
    }

    async fn list(&self, filter: JobFilter, page: Page) -> Result<Vec<Job>, PersistenceError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .collect())
    }

    async fn count(&self, filter: JobFilter) -> Result<i64, PersistenceError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .count() as i64)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, PersistenceError> {
        let mut state = self.state.lock().await;
        state.slides.retain(|(job_id, _), _| *job_id != id);
        Ok(state.jobs.remove(&id).is_some())
    }
}

#[async_trait]
impl SlideStore for MemoryStore {
    async fn upsert(&self, slide: NewSlide) -> Result<Slide, PersistenceError> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&slide.job_id) {
            return Err(PersistenceError::JobNotFound(slide.job_id));
        }

        let key = (slide.job_id, slide.slide_number);
        let now = Utc::now();
        let record = match state.slides.get(&key) {
            Some(existing) => Slide {
                location: slide.location,
                slide_type: slide.slide_type,
                content_preview: slide.content_preview,
                updated_at: Some(now),
                ..existing.clone()
            },
            None => Slide {
                id: Uuid::new_v4(),
                job_id: slide.job_id,
                slide_number: slide.slide_number,
                location: slide.location,
                slide_type: slide.slide_type,
                content_preview: slide.content_preview,
                created_at: now,
                updated_at: None,
            },
        };
        state.slides.insert(key, record.clone());
        Ok(record)
    }

    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<Slide>, PersistenceError> {
        let state = self.state.lock().await;
        Ok(state
            .slides
            .range((job_id, i32::MIN)..=(job_id, i32::MAX))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn get(&self, job_id: Uuid, slide_number: i32) -> Result<Option<Slide>, PersistenceError> {
        Ok(self
            .state
            .lock()
            .await
            .slides
            .get(&(job_id, slide_number))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobConfig;
    use crate::models::slide::SlideType;

    async fn seeded() -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let job = Job::new("in.txt".to_string(), JobConfig::default());
        let id = job.id;
        JobStore::create(&store, &job).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_transition_guard_rejects_terminal_rewrite() {
        let (store, id) = seeded().await;
        let processing = JobStatus::Processing.allowed_predecessors();
        let failed = JobStatus::Failed.allowed_predecessors();

        assert!(store
            .transition_status(id, processing, JobStatus::Processing, None)
            .await
            .unwrap());
        assert!(store
            .transition_status(id, failed, JobStatus::Failed, Some("boom"))
            .await
            .unwrap());
        assert!(!store
            .transition_status(id, processing, JobStatus::Processing, None)
            .await
            .unwrap());

        let job = JobStore::get(&store, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_output_written_only_with_accepted_completion() {
        let (store, id) = seeded().await;
        let completed = JobStatus::Completed.allowed_predecessors();

        assert!(!store.complete_with_output(id, completed, "early.pdf").await.unwrap());
        assert!(!store.replace_output(id, "early.pdf").await.unwrap());
        let job = JobStore::get(&store, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.output_key.is_none());

        store
            .transition_status(id, &[JobStatus::Pending], JobStatus::Processing, None)
            .await
            .unwrap();
        assert!(store.complete_with_output(id, completed, "a.pdf").await.unwrap());
        assert!(store.replace_output(id, "b.pdf").await.unwrap());

        let job = JobStore::get(&store, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output_key.as_deref(), Some("b.pdf"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_bounded() {
        let (store, id) = seeded().await;
        store.reset_progress(id, 3).await.unwrap();
        store.update_progress(id, 2, 3).await.unwrap();
        store.update_progress(id, 1, 3).await.unwrap();
        let job = JobStore::get(&store, id).await.unwrap().unwrap();
        assert_eq!(job.completed_slides, 2);

        store.update_progress(id, 9, 3).await.unwrap();
        let job = JobStore::get(&store, id).await.unwrap().unwrap();
        assert_eq!((job.completed_slides, job.total_slides), (3, 3));
    }

    #[tokio::test]
    async fn test_slide_upsert_replaces_same_number() {
        let (store, id) = seeded().await;
        for location in ["a", "b"] {
            store
                .upsert(NewSlide {
                    job_id: id,
                    slide_number: 1,
                    location: location.to_string(),
                    slide_type: SlideType::Title,
                    content_preview: None,
                })
                .await
                .unwrap();
        }
        let slides = store.list_by_job(id).await.unwrap();
        assert_eq!(slides.len(), 1);
        assert_eq!(slides[0].location, "b");
        assert!(slides[0].updated_at.is_some());
    }

    #[tokio::test]
    async fn test_list_filters_and_delete_cascades() {
        let (store, id) = seeded().await;
        let other = Job::new("other.txt".to_string(), JobConfig::default());
        JobStore::create(&store, &other).await.unwrap();
        store
            .transition_status(other.id, &[JobStatus::Pending], JobStatus::Failed, Some("x"))
            .await
            .unwrap();
        store
            .upsert(NewSlide {
                job_id: id,
                slide_number: 1,
                location: "k".to_string(),
                slide_type: SlideType::Content,
                content_preview: None,
            })
            .await
            .unwrap();

        let failed = JobFilter {
            status: Some(JobStatus::Failed),
        };
        assert_eq!(store.count(failed).await.unwrap(), 1);
        assert_eq!(store.list(failed, Page::default()).await.unwrap()[0].id, other.id);
        assert_eq!(store.count(JobFilter::default()).await.unwrap(), 2);

        assert!(store.delete(id).await.unwrap());
        assert!(store.list_by_job(id).await.unwrap().is_empty());
        assert!(!store.delete(id).await.unwrap());
    }
}
