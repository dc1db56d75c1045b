//! Object storage for source documents, slide markup and assembled decks.
//!
//! Three backends share the [`ObjectStore`] trait: S3/MinIO for deployments,
//! a local directory for development and an in-memory map for the local
//! runner and tests. [`KeyLayout`] owns every key format so that writers and
//! readers never disagree on where a job's objects live.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

pub mod fs;
pub mod memory;
pub mod s3;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object {0} not found")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key/value blob store. Keys are `/`-separated and never start with `/`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Key layout
// ────────────────────────────────────────────────────────────────────────────

/// Key formats under a configurable prefix:
///
/// - `<prefix>/inputs/<upload>/<file_name>`
/// - `<prefix>/htmls/<job>/slide_<n>.html`
/// - `<prefix>/outputs/<job>/presentation_<job>_<YYYY-MM-DD>.<ext>`
#[derive(Debug, Clone)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn join(&self, rest: &str) -> String {
        if self.prefix.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{}", self.prefix, rest)
        }
    }

    pub fn input_key(&self, upload_id: Uuid, file_name: &str) -> String {
        self.join(&format!("inputs/{upload_id}/{file_name}"))
    }

    pub fn slides_prefix(&self, job_id: Uuid) -> String {
        self.join(&format!("htmls/{job_id}/"))
    }

    pub fn slide_key(&self, job_id: Uuid, slide_number: usize) -> String {
        format!("{}slide_{slide_number}.html", self.slides_prefix(job_id))
    }

    pub fn outputs_prefix(&self, job_id: Uuid) -> String {
        self.join(&format!("outputs/{job_id}/"))
    }

    pub fn output_key(&self, job_id: Uuid, date: NaiveDate, extension: &str) -> String {
        format!(
            "{}presentation_{job_id}_{}.{extension}",
            self.outputs_prefix(job_id),
            date.format("%Y-%m-%d")
        )
    }
}

/// Extracts `n` from a key ending in `slide_<n>.html`.
pub fn slide_number_from_key(key: &str) -> Option<usize> {
    let name = key.rsplit('/').next()?;
    name.strip_prefix("slide_")?
        .strip_suffix(".html")?
        .parse()
        .ok()
}

/// Last path segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
