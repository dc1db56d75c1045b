use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::{PersistenceError, CANCELLED_MESSAGE};
use crate::render::style::parse_color;

// ────────────────────────────────────────────────────────────────────────────
// Job status state machine
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a job: `pending → processing → {completed | failed}`.
/// `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// States from which a write of `self` is accepted.
    ///
    /// `processing → processing` is accepted so a redelivered task can resume.
    /// `pending → failed` covers cancellation before pickup and enqueue failures.
    pub fn allowed_predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Processing => &[JobStatus::Pending, JobStatus::Processing],
            JobStatus::Completed => &[JobStatus::Processing],
            JobStatus::Failed => &[JobStatus::Pending, JobStatus::Processing],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.allowed_predecessors().contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Job configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Fixed-canvas document, one page per slide.
    #[default]
    Pdf,
    /// Native-shapes document, one shape per markup element.
    Pptx,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Pptx => "pptx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(OutputFormat::Pdf),
            "pptx" | "ppt" => Ok(OutputFormat::Pptx),
            other => Err(format!("unsupported output format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    Claude,
    #[default]
    Gemini,
}

impl FromStr for GenerationProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(GenerationProvider::Claude),
            "gemini" => Ok(GenerationProvider::Gemini),
            other => Err(format!("unknown generation provider '{other}'")),
        }
    }
}

/// Styling shared by every generated slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub primary_color: String,
    pub secondary_color: String,
    pub accent_color: String,
    pub background_color: String,
    pub page_background_color: String,
    pub title_color: String,
    pub body_color: String,
    pub content_font: String,
    pub title_font_size: u32,
    pub body_font_size: u32,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            primary_color: "#004080".to_string(),
            secondary_color: "#0066CC".to_string(),
            accent_color: "#FFA000".to_string(),
            background_color: "#FFFFFF".to_string(),
            page_background_color: "#FFFFFF".to_string(),
            title_color: "#004080".to_string(),
            body_color: "#333333".to_string(),
            content_font: "Inter".to_string(),
            title_font_size: 28,
            body_font_size: 11,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleSlideConfig {
    pub enabled: bool,
    /// `"auto"` renders the current month and year.
    pub date: String,
    pub background_color: String,
    pub text_color: String,
    pub font: String,
}

impl Default for TitleSlideConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            date: "auto".to_string(),
            background_color: "#004080".to_string(),
            text_color: "#FFFFFF".to_string(),
            font: "Inter".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndingKind {
    #[default]
    ThankYou,
    Questions,
    Contact,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
}

impl ContactInfo {
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(email) = &self.email {
            lines.push(format!("Email: {email}"));
        }
        if let Some(phone) = &self.phone {
            lines.push(format!("Phone: {phone}"));
        }
        if let Some(website) = &self.website {
            lines.push(format!("Website: {website}"));
        }
        if let Some(address) = &self.address {
            lines.push(address.clone());
        }
        lines
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndingSlideConfig {
    pub enabled: bool,
    pub kind: EndingKind,
    pub main_text: String,
    pub secondary_text: String,
    pub background_color: String,
    pub text_color: String,
    pub contact: ContactInfo,
}

impl Default for EndingSlideConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: EndingKind::ThankYou,
            main_text: "Thank You".to_string(),
            secondary_text: String::new(),
            background_color: "#004080".to_string(),
            text_color: "#FFFFFF".to_string(),
            contact: ContactInfo::default(),
        }
    }
}

/// Validated per-job configuration.
///
/// Built once at job creation, stored with the job row, and passed by value
/// through the pipeline. Unknown fields are ignored; missing fields take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub title: String,
    pub subtitle: Option<String>,
    pub author: Option<String>,
    /// Target number of content slides. `-1` means one slide per source record.
    pub number_of_slides: i64,
    /// Cap on source pages/sections. `-1` means all.
    pub pages_to_process: i64,
    pub output_format: OutputFormat,
    pub llm_provider: GenerationProvider,
    pub slide_width: u32,
    pub slide_height: u32,
    pub styling: StyleConfig,
    pub title_slide: TitleSlideConfig,
    pub ending_slide: EndingSlideConfig,
    pub additional_prompt: String,
    /// Retries per slide for the retry-and-skip policy.
    pub max_retries: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            title: "Presentation".to_string(),
            subtitle: None,
            author: None,
            number_of_slides: 15,
            pages_to_process: -1,
            output_format: OutputFormat::Pdf,
            llm_provider: GenerationProvider::Gemini,
            slide_width: 1280,
            slide_height: 720,
            styling: StyleConfig::default(),
            title_slide: TitleSlideConfig::default(),
            ending_slide: EndingSlideConfig::default(),
            additional_prompt: String::new(),
            max_retries: 2,
        }
    }
}

impl JobConfig {
    /// Checks value ranges and color syntax. Returns the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title cannot be empty".to_string());
        }
        if self.pages_to_process == 0 || self.pages_to_process < -1 {
            return Err("pages_to_process must be -1 or a positive number".to_string());
        }
        if self.slide_width == 0 || self.slide_height == 0 {
            return Err("slide dimensions must be positive".to_string());
        }
        if !(1..=200).contains(&self.styling.title_font_size)
            || !(1..=200).contains(&self.styling.body_font_size)
        {
            return Err("font sizes must be between 1 and 200".to_string());
        }
        if self.max_retries > 10 {
            return Err("max_retries must be at most 10".to_string());
        }

        let colors = [
            ("primary_color", &self.styling.primary_color),
            ("secondary_color", &self.styling.secondary_color),
            ("accent_color", &self.styling.accent_color),
            ("background_color", &self.styling.background_color),
            ("page_background_color", &self.styling.page_background_color),
            ("title_color", &self.styling.title_color),
            ("body_color", &self.styling.body_color),
            ("title_slide.background_color", &self.title_slide.background_color),
            ("title_slide.text_color", &self.title_slide.text_color),
            ("ending_slide.background_color", &self.ending_slide.background_color),
            ("ending_slide.text_color", &self.ending_slide.text_color),
        ];
        for (name, value) in colors {
            if parse_color(value).is_none() {
                return Err(format!("{name} must be a #rgb or #rrggbb color, got '{value}'"));
            }
        }
        Ok(())
    }

    pub fn title_flag(&self) -> usize {
        usize::from(self.title_slide.enabled)
    }

    pub fn ending_flag(&self) -> usize {
        usize::from(self.ending_slide.enabled)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Job record
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub input_key: String,
    pub config: JobConfig,
    pub total_slides: i32,
    pub completed_slides: i32,
    pub error_message: Option<String>,
    pub output_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh `pending` job, not yet persisted.
    pub fn new(input_key: String, config: JobConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            input_key,
            config,
            total_slides: 0,
            completed_slides: 0,
            error_message: None,
            output_key: None,
            created_at: Utc::now(),
            updated_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Failed && self.error_message.as_deref() == Some(CANCELLED_MESSAGE)
    }

    /// Completion percentage rounded to two decimals.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_slides <= 0 {
            return 0.0;
        }
        let pct = self.completed_slides as f64 / self.total_slides as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}

/// Raw `jobs` row as stored in PostgreSQL.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub status: String,
    pub input_key: String,
    pub config: Value,
    pub total_slides: i32,
    pub completed_slides: i32,
    pub error_message: Option<String>,
    pub output_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = PersistenceError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(PersistenceError::Corrupt)?;
        let config: JobConfig = serde_json::from_value(row.config)
            .map_err(|e| PersistenceError::Corrupt(format!("job {} config: {e}", row.id)))?;

        Ok(Job {
            id: row.id,
            status,
            input_key: row.input_key,
            config,
            total_slides: row.total_slides,
            completed_slides: row.completed_slides,
            error_message: row.error_message,
            output_key: row.output_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_one_way() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: JobConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.number_of_slides, 15);
        assert_eq!(config.pages_to_process, -1);
        assert_eq!(config.output_format, OutputFormat::Pdf);
        assert_eq!(config.llm_provider, GenerationProvider::Gemini);
        assert_eq!(config.slide_width, 1280);
        assert!(config.title_slide.enabled);
        assert!(config.ending_slide.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_color() {
        let mut config = JobConfig::default();
        config.styling.accent_color = "orange".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("accent_color"));
    }

    #[test]
    fn test_config_rejects_zero_page_cap() {
        let config = JobConfig {
            pages_to_process: 0,
            ..JobConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cancelled_job_detection() {
        let mut job = Job::new("in.pdf".to_string(), JobConfig::default());
        assert!(!job.is_cancelled());
        job.status = JobStatus::Failed;
        job.error_message = Some(CANCELLED_MESSAGE.to_string());
        assert!(job.is_cancelled());
        job.error_message = Some("boom".to_string());
        assert!(!job.is_cancelled());
    }

    #[test]
    fn test_progress_percentage_rounds() {
        let mut job = Job::new("in.txt".to_string(), JobConfig::default());
        assert_eq!(job.progress_percentage(), 0.0);
        job.total_slides = 3;
        job.completed_slides = 1;
        assert_eq!(job.progress_percentage(), 33.33);
    }

    #[test]
    fn test_contact_lines_order() {
        let contact = ContactInfo {
            email: Some("a@b.c".to_string()),
            phone: None,
            website: Some("example.com".to_string()),
            address: Some("1 Main St".to_string()),
        };
        assert_eq!(
            contact.lines(),
            vec!["Email: a@b.c", "Website: example.com", "1 Main St"]
        );
    }
}
