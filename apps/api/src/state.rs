use std::sync::Arc;

use crate::jobs::queue::TaskQueue;
use crate::jobs::store::{JobStore, SlideStore};
use crate::jobs::tracker::JobTracker;
use crate::storage::{KeyLayout, ObjectStore};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub slides: Arc<dyn SlideStore>,
    pub storage: Arc<dyn ObjectStore>,
    /// Background work goes here; handlers never run the pipeline themselves.
    pub queue: Arc<dyn TaskQueue>,
    pub keys: KeyLayout,
}

impl AppState {
    pub fn tracker(&self) -> JobTracker {
        JobTracker::new(self.jobs.clone())
    }
}
