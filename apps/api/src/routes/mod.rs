pub mod health;
pub mod jobs;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/uploads", post(jobs::handle_upload))
        .route(
            "/api/v1/jobs",
            get(jobs::handle_list_jobs).post(jobs::handle_create_job),
        )
        .route(
            "/api/v1/jobs/:id",
            get(jobs::handle_get_job).delete(jobs::handle_delete_job),
        )
        .route("/api/v1/jobs/:id/cancel", post(jobs::handle_cancel_job))
        .route("/api/v1/jobs/:id/convert", post(jobs::handle_convert))
        .route("/api/v1/jobs/:id/download", get(jobs::handle_download))
        .route("/api/v1/jobs/:id/slides", get(jobs::handle_list_slides))
        .route(
            "/api/v1/jobs/:id/slides/regenerate",
            post(jobs::handle_regenerate),
        )
        .route("/api/v1/jobs/:id/slides/:n", get(jobs::handle_get_slide))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::errors::CANCELLED_MESSAGE;
    use crate::jobs::memory::MemoryStore;
    use crate::jobs::queue::{MemoryQueue, Task};
    use crate::jobs::store::{JobStore, SlideStore};
    use crate::models::job::{Job, JobConfig, JobStatus};
    use crate::models::slide::{NewSlide, SlideType};
    use crate::storage::{KeyLayout, MemoryObjectStore, ObjectStore};

    struct Harness {
        app: Router,
        jobs: Arc<MemoryStore>,
        storage: Arc<MemoryObjectStore>,
        queue: Arc<MemoryQueue>,
        keys: KeyLayout,
    }

    fn harness_with(queue: MemoryQueue) -> Harness {
        let jobs = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryObjectStore::new());
        let queue = Arc::new(queue);
        let keys = KeyLayout::new("decks");
        let state = AppState {
            jobs: jobs.clone(),
            slides: jobs.clone(),
            storage: storage.clone(),
            queue: queue.clone(),
            keys: keys.clone(),
        };
        Harness {
            app: build_router(state),
            jobs,
            storage,
            queue,
            keys,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryQueue::default())
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn stored_input(h: &Harness) -> String {
        let key = h.keys.input_key(Uuid::new_v4(), "notes.md");
        h.storage
            .put(&key, Bytes::from_static(b"# One\ntext\n"), "text/markdown")
            .await
            .unwrap();
        key
    }

    async fn seeded_job(h: &Harness, status: JobStatus) -> Job {
        let key = stored_input(h).await;
        let mut job = Job::new(key, JobConfig::default());
        job.status = status;
        JobStore::create(h.jobs.as_ref(), &job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, body) = send(&h.app, empty_request("GET", "/health")).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_upload_stores_file() {
        let h = harness();
        let payload = "--XBOUNDARY\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"my notes.md\"\r\n\
            Content-Type: text/markdown\r\n\r\n\
            # Intro\nhello\r\n\
            --XBOUNDARY--\r\n";
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/uploads")
            .header("content-type", "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(payload))
            .unwrap();

        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::CREATED);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["file_name"], "my_notes.md");
        let key = body["input_key"].as_str().unwrap();
        assert!(key.ends_with("/my_notes.md"));
        assert!(h.storage.exists(key).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_job_queues_pipeline() {
        let h = harness();
        let key = stored_input(&h).await;

        let (status, body) = send(
            &h.app,
            json_request(
                "POST",
                "/api/v1/jobs",
                json!({ "input_key": key, "config": { "title": "Quarterly", "output_format": "pptx" } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "pending");
        let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();

        let queued = h.queue.tasks.lock().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].task, Task::GenerateAndConvert { job_id });

        let job = JobStore::get(h.jobs.as_ref(), job_id).await.unwrap().unwrap();
        assert_eq!(job.config.title, "Quarterly");
    }

    #[tokio::test]
    async fn test_create_job_with_missing_input_is_404() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            json_request("POST", "/api/v1/jobs", json!({ "input_key": "decks/inputs/nope.md" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(h.queue.tasks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_queue_failure_marks_job_failed() {
        let h = harness_with(MemoryQueue {
            refuse: true,
            ..Default::default()
        });
        let key = stored_input(&h).await;

        let (status, _) = send(
            &h.app,
            json_request("POST", "/api/v1/jobs", json!({ "input_key": key })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let jobs = JobStore::list(h.jobs.as_ref(), Default::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert!(jobs[0]
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Failed to queue task:"));
    }

    #[tokio::test]
    async fn test_get_job_reports_progress() {
        let h = harness();
        let job = seeded_job(&h, JobStatus::Processing).await;
        JobStore::update_progress(h.jobs.as_ref(), job.id, 1, 3)
            .await
            .unwrap();

        let (status, body) = send(&h.app, empty_request("GET", &format!("/api/v1/jobs/{}", job.id))).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "processing");
        assert_eq!(body["completed_slides"], 1);
        assert_eq!(body["progress_percentage"], 33.33);

        let (status, _) = send(
            &h.app,
            empty_request("GET", &format!("/api/v1/jobs/{}", Uuid::new_v4())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let h = harness();
        seeded_job(&h, JobStatus::Completed).await;
        seeded_job(&h, JobStatus::Pending).await;
        seeded_job(&h, JobStatus::Pending).await;

        let (status, body) = send(
            &h.app,
            empty_request("GET", "/api/v1/jobs?status=pending&page=1&page_size=1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["total"], 2);
        assert_eq!(body["jobs"].as_array().unwrap().len(), 1);

        let (status, _) = send(&h.app, empty_request("GET", "/api/v1/jobs?status=bogus")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_then_cancel_again() {
        let h = harness();
        let job = seeded_job(&h, JobStatus::Processing).await;
        let uri = format!("/api/v1/jobs/{}/cancel", job.id);

        let (status, _) = send(&h.app, empty_request("POST", &uri)).await;
        assert_eq!(status, StatusCode::OK);
        let stored = JobStore::get(h.jobs.as_ref(), job.id).await.unwrap().unwrap();
        assert_eq!(stored.error_message.as_deref(), Some(CANCELLED_MESSAGE));

        let (status, _) = send(&h.app, empty_request("POST", &uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_slide_markup_falls_back_to_key_layout() {
        let h = harness();
        let job = seeded_job(&h, JobStatus::Processing).await;
        let indexed = h.keys.slide_key(job.id, 1);
        let unindexed = h.keys.slide_key(job.id, 2);
        for key in [&indexed, &unindexed] {
            h.storage
                .put(key, Bytes::from_static(b"<div id=\"slide\"></div>"), "text/html")
                .await
                .unwrap();
        }
        SlideStore::upsert(
            h.jobs.as_ref(),
            NewSlide {
                job_id: job.id,
                slide_number: 1,
                location: indexed,
                slide_type: SlideType::Title,
                content_preview: None,
            },
        )
        .await
        .unwrap();

        let (status, body) = send(&h.app, empty_request("GET", &format!("/api/v1/jobs/{}/slides", job.id))).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["slides"].as_array().unwrap().len(), 1);

        for n in [1, 2] {
            let (status, body) = send(
                &h.app,
                empty_request("GET", &format!("/api/v1/jobs/{}/slides/{n}", job.id)),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(&body[..], b"<div id=\"slide\"></div>");
        }

        let (status, _) = send(
            &h.app,
            empty_request("GET", &format!("/api/v1/jobs/{}/slides/3", job.id)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_regenerate_requires_completed_job() {
        let h = harness();
        let running = seeded_job(&h, JobStatus::Processing).await;
        let done = seeded_job(&h, JobStatus::Completed).await;
        let body = json!({ "slide_numbers": [2], "instructions": "fewer words" });

        let (status, _) = send(
            &h.app,
            json_request("POST", &format!("/api/v1/jobs/{}/slides/regenerate", running.id), body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &h.app,
            json_request("POST", &format!("/api/v1/jobs/{}/slides/regenerate", done.id), body),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let queued = h.queue.tasks.lock().await;
        assert_eq!(
            queued[0].task,
            Task::RegenerateSlides {
                job_id: done.id,
                slide_numbers: vec![2],
                instructions: "fewer words".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_convert_requires_completed_job() {
        let h = harness();
        let running = seeded_job(&h, JobStatus::Processing).await;
        let failed = seeded_job(&h, JobStatus::Failed).await;
        let done = seeded_job(&h, JobStatus::Completed).await;

        for job in [&running, &failed] {
            let (status, _) = send(
                &h.app,
                empty_request("POST", &format!("/api/v1/jobs/{}/convert", job.id)),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        assert!(h.queue.tasks.lock().await.is_empty());

        let (status, _) = send(
            &h.app,
            empty_request("POST", &format!("/api/v1/jobs/{}/convert", done.id)),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let queued = h.queue.tasks.lock().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].task, Task::Convert { job_id: done.id });
    }

    #[tokio::test]
    async fn test_download_and_delete() {
        let h = harness();
        let job = seeded_job(&h, JobStatus::Processing).await;
        let download = format!("/api/v1/jobs/{}/download", job.id);

        let (status, _) = send(&h.app, empty_request("GET", &download)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let output = h.keys.output_key(job.id, chrono::Utc::now().date_naive(), "pdf");
        h.storage
            .put(&output, Bytes::from_static(b"%PDF-1.5"), "application/pdf")
            .await
            .unwrap();
        h.storage
            .put(&h.keys.slide_key(job.id, 1), Bytes::from_static(b"<div></div>"), "text/html")
            .await
            .unwrap();
        let tracker = crate::jobs::tracker::JobTracker::new(h.jobs.clone());
        tracker.complete(job.id, &output).await.unwrap();

        let response = h.app.clone().oneshot(empty_request("GET", &download)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/pdf");
        let disposition = response.headers()["content-disposition"].to_str().unwrap();
        assert!(disposition.contains(".pdf"));

        let (status, _) = send(&h.app, empty_request("DELETE", &format!("/api/v1/jobs/{}", job.id))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!h.storage.exists(&output).await.unwrap());
        assert!(!h.storage.exists(&job.input_key).await.unwrap());
        assert!(JobStore::get(h.jobs.as_ref(), job.id).await.unwrap().is_none());
    }
}
