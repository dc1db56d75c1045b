use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::jobs::queue::Task;
use crate::jobs::store::{JobFilter, Page};
use crate::jobs::tracker::CancelOutcome;
use crate::models::job::{Job, JobConfig, JobStatus};
use crate::models::slide::Slide;
use crate::state::AppState;
use crate::storage::file_name;

const ACCEPTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "markdown", "html", "htm"];

// ────────────────────────────────────────────────────────────────────────────
// Request / response bodies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct UploadResponse {
    pub input_key: String,
    pub file_name: String,
    pub file_size: usize,
}

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub input_key: String,
    #[serde(default)]
    pub config: JobConfig,
}

#[derive(Serialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    pub progress_percentage: f64,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let progress_percentage = job.progress_percentage();
        Self {
            job,
            progress_percentage,
        }
    }
}

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Serialize)]
pub struct SlideListResponse {
    pub job_id: Uuid,
    pub total_slides: i32,
    pub slides: Vec<Slide>,
}

#[derive(Deserialize)]
pub struct RegenerateRequest {
    pub slide_numbers: Vec<usize>,
    #[serde(default)]
    pub instructions: String,
}

#[derive(Serialize)]
pub struct QueuedResponse {
    pub task_id: Uuid,
    pub message: String,
}

async fn load_job(state: &AppState, id: Uuid) -> Result<Job, AppError> {
    Ok(state.tracker().get(id).await?)
}

fn sanitize_file_name(name: &str) -> String {
    file_name(name)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/uploads
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original = field
            .file_name()
            .map(sanitize_file_name)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::Validation("File name is required".to_string()))?;
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let extension = original
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::Validation(format!(
                "Unsupported file type '{extension}'"
            )));
        }

        let body: Bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Cannot read upload: {e}")))?;
        if body.is_empty() {
            return Err(AppError::Validation("Uploaded file is empty".to_string()));
        }

        let key = state.keys.input_key(Uuid::new_v4(), &original);
        let size = body.len();
        state.storage.put(&key, body, &content_type).await?;
        info!("Stored upload {} ({} bytes) at {}", original, size, key);

        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                input_key: key,
                file_name: original,
                file_size: size,
            }),
        ));
    }

    Err(AppError::Validation("Multipart field 'file' is required".to_string()))
}

/// POST /api/v1/jobs
pub async fn handle_create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), AppError> {
    req.config.validate().map_err(AppError::Validation)?;

    if !state.storage.exists(&req.input_key).await? {
        return Err(AppError::NotFound(format!(
            "Input file {} not found",
            req.input_key
        )));
    }

    let job = Job::new(req.input_key, req.config);
    state.jobs.create(&job).await?;
    info!("Created job {}, queuing for processing", job.id);

    match state
        .queue
        .enqueue(Task::GenerateAndConvert { job_id: job.id })
        .await
    {
        Ok(task_id) => info!("Job {} queued as task {}", job.id, task_id),
        Err(e) => {
            let message = format!("Failed to queue task: {e}");
            state.tracker().fail(job.id, &message).await?;
            return Err(AppError::Queue(message));
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
        }),
    ))
}

/// GET /api/v1/jobs/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, AppError> {
    Ok(Json(load_job(&state, id).await?.into()))
}

/// GET /api/v1/jobs
pub async fn handle_list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<JobListResponse>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(AppError::Validation)?;
    let filter = JobFilter { status };
    let page = Page::new(params.page.unwrap_or(1), params.page_size.unwrap_or(20));

    let jobs = state.jobs.list(filter, page).await?;
    let total = state.jobs.count(filter).await?;

    Ok(Json(JobListResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        page: page.page,
        page_size: page.page_size,
    }))
}

/// POST /api/v1/jobs/:id/cancel
pub async fn handle_cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    match state.tracker().cancel(id).await? {
        CancelOutcome::Cancelled => Ok(Json(json!({
            "job_id": id,
            "status": JobStatus::Failed,
            "message": "Job cancelled"
        }))),
        CancelOutcome::AlreadyTerminal(status) => {
            Err(AppError::Validation(format!("Job is already {status}")))
        }
    }
}

/// DELETE /api/v1/jobs/:id
///
/// Removes slide markup, outputs and the source upload (best-effort), then
/// the job row; slide rows go with it.
pub async fn handle_delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let job = load_job(&state, id).await?;

    let mut keys = state.storage.list(&state.keys.slides_prefix(id)).await?;
    keys.extend(state.storage.list(&state.keys.outputs_prefix(id)).await?);
    keys.push(job.input_key.clone());

    for key in &keys {
        if let Err(e) = state.storage.delete(key).await {
            warn!("Job {}: could not delete {}: {}", id, key, e);
        }
    }

    if !state.jobs.delete(id).await? {
        return Err(AppError::NotFound(format!("Job {id} not found")));
    }
    info!("Deleted job {} and {} objects", id, keys.len());
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/jobs/:id/slides
pub async fn handle_list_slides(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SlideListResponse>, AppError> {
    let job = load_job(&state, id).await?;
    let slides = state.slides.list_by_job(id).await?;
    Ok(Json(SlideListResponse {
        job_id: id,
        total_slides: job.total_slides,
        slides,
    }))
}

/// GET /api/v1/jobs/:id/slides/:n
///
/// Served from the key layout when the slide row is missing, since indexing
/// is best-effort.
pub async fn handle_get_slide(
    State(state): State<AppState>,
    Path((id, number)): Path<(Uuid, i32)>,
) -> Result<impl IntoResponse, AppError> {
    load_job(&state, id).await?;
    if number < 1 {
        return Err(AppError::Validation("Slide numbers start at 1".to_string()));
    }

    let key = match state.slides.get(id, number).await? {
        Some(slide) => slide.location,
        None => state.keys.slide_key(id, number as usize),
    };
    let body = state.storage.get(&key).await?;

    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], body))
}

/// POST /api/v1/jobs/:id/slides/regenerate
pub async fn handle_regenerate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RegenerateRequest>,
) -> Result<(StatusCode, Json<QueuedResponse>), AppError> {
    let job = load_job(&state, id).await?;
    if job.status != JobStatus::Completed {
        return Err(AppError::Validation(
            "Can only regenerate slides of a completed job".to_string(),
        ));
    }
    if req.slide_numbers.is_empty() {
        return Err(AppError::Validation("slide_numbers must not be empty".to_string()));
    }

    let count = req.slide_numbers.len();
    let task_id = state
        .queue
        .enqueue(Task::RegenerateSlides {
            job_id: id,
            slide_numbers: req.slide_numbers,
            instructions: req.instructions,
        })
        .await
        .map_err(|e| AppError::Queue(format!("Failed to queue task: {e}")))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            task_id,
            message: format!("Regenerating {count} slide(s)"),
        }),
    ))
}

/// POST /api/v1/jobs/:id/convert
///
/// Rebuilds the artifact of a completed job.
pub async fn handle_convert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<QueuedResponse>), AppError> {
    let job = load_job(&state, id).await?;
    if job.status != JobStatus::Completed {
        return Err(AppError::Validation(
            "Can only convert a completed job".to_string(),
        ));
    }

    let task_id = state
        .queue
        .enqueue(Task::Convert { job_id: id })
        .await
        .map_err(|e| AppError::Queue(format!("Failed to queue task: {e}")))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            task_id,
            message: "Conversion queued".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/:id/download
pub async fn handle_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let job = load_job(&state, id).await?;
    if job.status != JobStatus::Completed {
        return Err(AppError::Validation("Job is not completed yet".to_string()));
    }
    let key = job
        .output_key
        .ok_or_else(|| AppError::NotFound("Output file not found".to_string()))?;

    let body = state.storage.get(&key).await?;
    let disposition = format!("attachment; filename=\"{}\"", file_name(&key));

    Ok((
        [
            (
                header::CONTENT_TYPE,
                job.config.output_format.content_type().to_string(),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}
