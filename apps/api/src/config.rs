use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    /// Local directory, for development without MinIO.
    Fs,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "s3" | "minio" => Ok(StorageBackend::S3),
            "fs" | "local" => Ok(StorageBackend::Fs),
            other => Err(anyhow!("STORAGE_BACKEND must be 's3' or 'fs', got '{other}'")),
        }
    }
}

/// Process configuration loaded from environment variables.
/// Startup fails if a required variable is missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub storage_backend: StorageBackend,
    pub storage_prefix: String,
    pub local_storage_dir: PathBuf,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub aws_region: String,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub queue_name: String,
    pub worker_max_jobs: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let storage_backend: StorageBackend = env_or("STORAGE_BACKEND", "s3").parse()?;
        // S3 settings are only mandatory when S3 is the backend
        let s3_env = |key: &str| match storage_backend {
            StorageBackend::S3 => require_env(key),
            StorageBackend::Fs => Ok(env_or(key, "")),
        };

        let (anthropic_api_key, google_api_key) = llm_keys_from_env();

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            storage_backend,
            storage_prefix: env_or("STORAGE_PREFIX", "decks"),
            local_storage_dir: PathBuf::from(env_or("LOCAL_STORAGE_DIR", "./data")),
            s3_bucket: s3_env("S3_BUCKET")?,
            s3_endpoint: s3_env("S3_ENDPOINT")?,
            aws_access_key_id: s3_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: s3_env("AWS_SECRET_ACCESS_KEY")?,
            aws_region: env_or("AWS_REGION", "us-east-1"),
            anthropic_api_key,
            google_api_key,
            queue_name: env_or("QUEUE_NAME", "deckgen:tasks"),
            worker_max_jobs: env_or("WORKER_MAX_JOBS", "10")
                .parse::<usize>()
                .context("WORKER_MAX_JOBS must be a positive integer")?,
            port: env_or("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

/// Provider keys; either may be absent as long as jobs only use the other.
pub fn llm_keys_from_env() -> (Option<String>, Option<String>) {
    dotenvy::dotenv().ok();
    let key = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
    (key("ANTHROPIC_API_KEY"), key("GOOGLE_API_KEY"))
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
