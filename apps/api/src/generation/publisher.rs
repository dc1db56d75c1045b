//! Persists each slide the moment it is produced.
//!
//! The markup write is required and propagates failures. The slide index
//! write is best-effort: failures are logged and the pipeline continues.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::jobs::store::SlideStore;
use crate::models::slide::{NewSlide, SlideType};
use crate::storage::{KeyLayout, ObjectStore};

pub const PREVIEW_CHARS: usize = 200;

#[derive(Clone)]
pub struct IncrementalPublisher {
    storage: Arc<dyn ObjectStore>,
    slides: Arc<dyn SlideStore>,
    keys: KeyLayout,
}

impl IncrementalPublisher {
    pub fn new(storage: Arc<dyn ObjectStore>, slides: Arc<dyn SlideStore>, keys: KeyLayout) -> Self {
        Self {
            storage,
            slides,
            keys,
        }
    }

    /// Stores `markup` as slide `slide_number` of `job_id` and indexes it.
    /// Returns the storage key.
    pub async fn publish(
        &self,
        job_id: Uuid,
        slide_number: usize,
        slide_type: SlideType,
        markup: &str,
        preview: Option<&str>,
    ) -> Result<String, PipelineError> {
        let key = self.keys.slide_key(job_id, slide_number);
        self.storage
            .put(&key, Bytes::copy_from_slice(markup.as_bytes()), "text/html")
            .await?;
        debug!("Job {}: stored slide {} at {}", job_id, slide_number, key);

        let record = NewSlide {
            job_id,
            slide_number: slide_number as i32,
            location: key.clone(),
            slide_type,
            content_preview: preview.map(truncate_preview),
        };
        if let Err(e) = self.slides.upsert(record).await {
            error!(
                "Job {}: failed to index slide {} ({}), continuing",
                job_id, slide_number, e
            );
        }

        Ok(key)
    }
}

/// First [`PREVIEW_CHARS`] characters, on a char boundary.
pub fn truncate_preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}
