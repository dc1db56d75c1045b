use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideType {
    Title,
    Content,
    Ending,
}

impl SlideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlideType::Title => "title",
            SlideType::Content => "content",
            SlideType::Ending => "ending",
        }
    }
}

impl std::str::FromStr for SlideType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(SlideType::Title),
            "content" => Ok(SlideType::Content),
            "ending" => Ok(SlideType::Ending),
            other => Err(format!("unknown slide type '{other}'")),
        }
    }
}

/// One persisted slide: where its markup lives and its place in the deck.
#[derive(Debug, Clone, Serialize)]
pub struct Slide {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Dense, 1-based position within the job.
    pub slide_number: i32,
    pub location: String,
    pub slide_type: SlideType,
    pub content_preview: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Input for creating (or replacing) a slide record.
#[derive(Debug, Clone)]
pub struct NewSlide {
    pub job_id: Uuid,
    pub slide_number: i32,
    pub location: String,
    pub slide_type: SlideType,
    pub content_preview: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SlideRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub slide_number: i32,
    pub location: String,
    pub slide_type: String,
    pub content_preview: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<SlideRow> for Slide {
    type Error = PersistenceError;

    fn try_from(row: SlideRow) -> Result<Self, Self::Error> {
        Ok(Slide {
            id: row.id,
            job_id: row.job_id,
            slide_number: row.slide_number,
            location: row.location,
            slide_type: row
                .slide_type
                .parse()
                .map_err(PersistenceError::Corrupt)?,
            content_preview: row.content_preview,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
