use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GenerationError;

/// Opaque identifier of a generation job.
///
/// Rendered as a hyphenated UUID string at every outward boundary.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Closed set of content-generation job kinds.
///
/// Each kind owns one physical table and one generation collaborator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Story,
    Illustration,
    Cartoonize,
    ColoringPage,
}

impl JobKind {
    /// Every kind, in table probe order.
    pub const ALL: [JobKind; 4] = [
        JobKind::Story,
        JobKind::Illustration,
        JobKind::Cartoonize,
        JobKind::ColoringPage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Story => "story",
            JobKind::Illustration => "illustration",
            JobKind::Cartoonize => "cartoonize",
            JobKind::ColoringPage => "coloring_page",
        }
    }

    /// Name of the physical table backing this kind.
    pub fn table(&self) -> &'static str {
        match self {
            JobKind::Story => "story_jobs",
            JobKind::Illustration => "illustration_jobs",
            JobKind::Cartoonize => "cartoonize_jobs",
            JobKind::ColoringPage => "coloring_page_jobs",
        }
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct ParseEnumError {
    pub what: &'static str,
    pub value: String,
}

impl FromStr for JobKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                what: "job kind",
                value: s.to_string(),
            })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(ParseEnumError {
                what: "job status",
                value: other.to_string(),
            }),
        }
    }
}

pub const MAX_STORY_PAGES: u32 = 32;
pub const MIN_IMAGE_DIMENSION: u32 = 64;
pub const MAX_IMAGE_DIMENSION: u32 = 4096;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryInput {
    pub prompt: String,
    #[serde(default)]
    pub age_group: Option<String>,
    pub page_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IllustrationInput {
    pub prompt: String,
    #[serde(default)]
    pub style: Option<String>,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartoonizeInput {
    pub source_image_url: String,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoringPageInput {
    pub subject: String,
    #[serde(default)]
    pub line_detail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryResult {
    pub title: String,
    pub pages: Vec<String>,
}

/// Result shared by every image-producing kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    pub image_url: String,
}

/// Kind-specific request payload. The variant determines the job kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum JobInput {
    Story(StoryInput),
    Illustration(IllustrationInput),
    Cartoonize(CartoonizeInput),
    ColoringPage(ColoringPageInput),
}

impl JobInput {
    pub fn kind(&self) -> JobKind {
        match self {
            JobInput::Story(_) => JobKind::Story,
            JobInput::Illustration(_) => JobKind::Illustration,
            JobInput::Cartoonize(_) => JobKind::Cartoonize,
            JobInput::ColoringPage(_) => JobKind::ColoringPage,
        }
    }

    /// Reject payloads no collaborator could act on.
    pub fn validate(&self) -> Result<(), GenerationError> {
        match self {
            JobInput::Story(input) => {
                require_text("prompt", &input.prompt)?;
                if input.page_count == 0 || input.page_count > MAX_STORY_PAGES {
                    return Err(GenerationError::validation(format!(
                        "page_count must be between 1 and {MAX_STORY_PAGES}, got {}",
                        input.page_count
                    )));
                }
                Ok(())
            }
            JobInput::Illustration(input) => {
                require_text("prompt", &input.prompt)?;
                require_dimension("width", input.width)?;
                require_dimension("height", input.height)
            }
            JobInput::Cartoonize(input) => {
                require_text("source_image_url", &input.source_image_url)
            }
            JobInput::ColoringPage(input) => require_text("subject", &input.subject),
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<(), GenerationError> {
    if value.trim().is_empty() {
        return Err(GenerationError::validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_dimension(field: &str, value: u32) -> Result<(), GenerationError> {
    if !(MIN_IMAGE_DIMENSION..=MAX_IMAGE_DIMENSION).contains(&value) {
        return Err(GenerationError::validation(format!(
            "{field} must be between {MIN_IMAGE_DIMENSION} and {MAX_IMAGE_DIMENSION}, got {value}"
        )));
    }
    Ok(())
}

/// Kind-specific output, present only on completed jobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum JobResult {
    Story(StoryResult),
    Illustration(ImageResult),
    Cartoonize(ImageResult),
    ColoringPage(ImageResult),
}

impl JobResult {
    pub fn kind(&self) -> JobKind {
        match self {
            JobResult::Story(_) => JobKind::Story,
            JobResult::Illustration(_) => JobKind::Illustration,
            JobResult::Cartoonize(_) => JobKind::Cartoonize,
            JobResult::ColoringPage(_) => JobKind::ColoringPage,
        }
    }
}

/// Unified job record, independent of the table it lives in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: JobInput,
    pub result: Option<JobResult>,
}

impl Job {
    /// A fresh pending job with no progress.
    pub fn new(
        input: JobInput,
        owner_id: Option<String>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            owner_id,
            status: JobStatus::Pending,
            progress: 0,
            current_step: None,
            error_message: None,
            retry_count: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            input,
            result: None,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.input.kind()
    }
}

/// Read-only projection handed to the transport layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobView {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub owner_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input_data: JobInput,
    pub result_data: Option<JobResult>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            kind: job.kind(),
            status: job.status,
            progress: job.progress,
            current_step: job.current_step,
            owner_id: job.owner_id,
            error_message: job.error_message,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            input_data: job.input,
            result_data: job.result,
        }
    }
}

/// Selection criteria for listing jobs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub kind: Option<JobKind>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Kinds this filter touches, in probe order.
    pub fn kinds(&self) -> Vec<JobKind> {
        match self.kind {
            Some(kind) => vec![kind],
            None => JobKind::ALL.to_vec(),
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.owner_id
            .as_deref()
            .map_or(true, |owner| job.owner_id.as_deref() == Some(owner))
            && self.kind.map_or(true, |kind| job.kind() == kind)
            && self.status.map_or(true, |status| job.status == status)
    }
}
