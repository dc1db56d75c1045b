use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::store::{JobFilter, JobStore, Page, SlideStore};
use crate::errors::PersistenceError;
use crate::models::job::{Job, JobRow, JobStatus};
use crate::models::slide::{NewSlide, Slide, SlideRow};

/// Job and slide records in PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguishes a guarded write that matched no row from a missing job.
    async fn ensure_exists(&self, id: Uuid) -> Result<(), PersistenceError> {
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        exists.map(|_| ()).ok_or(PersistenceError::JobNotFound(id))
    }
}

fn status_strings(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl JobStore for PgStore {
    async fn create(&self, job: &Job) -> Result<(), PersistenceError> {
        let config = serde_json::to_value(&job.config)
            .map_err(|e| PersistenceError::Corrupt(format!("job config: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, status, input_key, config, total_slides, completed_slides, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.input_key)
        .bind(config)
        .bind(job.total_slides)
        .bind(job.completed_slides)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, PersistenceError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        allowed_from: &[JobStatus],
        to: JobStatus,
        error_message: Option<&str>,
    ) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status        = $3,
                error_message = COALESCE($4, error_message),
                updated_at    = NOW(),
                started_at    = CASE WHEN $3 = 'processing' THEN COALESCE(started_at, NOW())
                                     ELSE started_at END,
                completed_at  = CASE WHEN $3 IN ('completed', 'failed') THEN NOW()
                                     ELSE completed_at END
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(id)
        .bind(status_strings(allowed_from))
        .bind(to.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_exists(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn reset_progress(&self, id: Uuid, total: i32) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            "UPDATE jobs SET total_slides = $2, completed_slides = 0, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(total.max(0))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::JobNotFound(id));
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        id: Uuid,
        completed: i32,
        total: i32,
    ) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                total_slides     = $3,
                completed_slides = LEAST(GREATEST(completed_slides, $2), $3),
                updated_at       = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(completed)
        .bind(total.max(0))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::JobNotFound(id));
        }
        Ok(())
    }

    async fn complete_with_output(
        &self,
        id: Uuid,
        allowed_from: &[JobStatus],
        key: &str,
    ) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status       = 'completed',
                output_key   = $3,
                updated_at   = NOW(),
                completed_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(id)
        .bind(status_strings(allowed_from))
        .bind(key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_exists(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn replace_output(&self, id: Uuid, key: &str) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            "UPDATE jobs SET output_key = $2, updated_at = NOW() WHERE id = $1 AND status = 'completed'",
        )
        .bind(id)
        .bind(key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_exists(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn list(&self, filter: JobFilter, page: Page) -> Result<Vec<Job>, PersistenceError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(page.page_size as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count(&self, filter: JobFilter) -> Result<i64, PersistenceError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE ($1::text IS NULL OR status = $1)")
                .bind(filter.status.map(|s| s.as_str()))
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, PersistenceError> {
        // slides go with ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SlideStore for PgStore {
    async fn upsert(&self, slide: NewSlide) -> Result<Slide, PersistenceError> {
        let row = sqlx::query_as::<_, SlideRow>(
            r#"
            INSERT INTO slides (id, job_id, slide_number, location, slide_type, content_preview)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (job_id, slide_number) DO UPDATE SET
                location        = EXCLUDED.location,
                slide_type      = EXCLUDED.slide_type,
                content_preview = EXCLUDED.content_preview,
                updated_at      = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(slide.job_id)
        .bind(slide.slide_number)
        .bind(&slide.location)
        .bind(slide.slide_type.as_str())
        .bind(&slide.content_preview)
        .fetch_one(&self.pool)
        .await?;

        Slide::try_from(row)
    }

    async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<Slide>, PersistenceError> {
        let rows = sqlx::query_as::<_, SlideRow>(
            "SELECT * FROM slides WHERE job_id = $1 ORDER BY slide_number",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Slide::try_from).collect()
    }

    async fn get(&self, job_id: Uuid, slide_number: i32) -> Result<Option<Slide>, PersistenceError> {
        let row = sqlx::query_as::<_, SlideRow>(
            "SELECT * FROM slides WHERE job_id = $1 AND slide_number = $2",
        )
        .bind(job_id)
        .bind(slide_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Slide::try_from).transpose()
    }
}
