use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::StorageError;

/// Error message written to a job cancelled by an operator.
/// The conversion stage looks for this exact string before it starts.
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// Failures of the persistence collaborator (job and slide records).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Error taxonomy of the generation pipeline and the document assembler.
///
/// Propagation rules:
/// - `Persistence` from the slide index is logged and swallowed by the publisher.
/// - `Generation` aborts a pipelined job; the retry-and-skip policy skips the slide instead.
/// - `Conversion` always aborts and fails the job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("No content found in source file")]
    EmptyContent,

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{}", CANCELLED_MESSAGE)]
    Cancelled,
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Persistence(PersistenceError::JobNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Job {id} not found"),
            ),
            AppError::Persistence(e) => {
                tracing::error!("Persistence error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Storage(StorageError::NotFound(key)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Object {key} not found"),
            ),
            AppError::Storage(e) => {
                tracing::error!("Storage error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Queue(msg) => {
                tracing::error!("Queue error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "QUEUE_ERROR",
                    msg.clone(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
