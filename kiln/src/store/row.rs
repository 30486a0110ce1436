use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::{
    CartoonizeInput, ColoringPageInput, IllustrationInput, ImageResult, Job, JobId,
    JobInput, JobKind, JobResult, JobStatus, StoryInput, StoryResult,
};
use crate::tracker::clamp_progress;

/// Columns every per-kind table carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommonColumns {
    pub id: Uuid,
    pub owner_id: Option<String>,
    pub status: String,
    pub progress: i32,
    pub current_step: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Kind-specific input and result columns, one variant per table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum KindColumns {
    Story {
        prompt: String,
        age_group: Option<String>,
        page_count: i32,
        title: Option<String>,
        pages: Option<serde_json::Value>,
    },
    Illustration {
        prompt: String,
        style: Option<String>,
        width: i32,
        height: i32,
        image_url: Option<String>,
    },
    Cartoonize {
        source_image_url: String,
        style: Option<String>,
        image_url: Option<String>,
    },
    ColoringPage {
        subject: String,
        line_detail: Option<String>,
        image_url: Option<String>,
    },
}

/// A job as it is physically stored in its kind's table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub common: CommonColumns,
    pub columns: KindColumns,
}

impl JobRow {
    pub fn kind(&self) -> JobKind {
        match self.columns {
            KindColumns::Story { .. } => JobKind::Story,
            KindColumns::Illustration { .. } => JobKind::Illustration,
            KindColumns::Cartoonize { .. } => JobKind::Cartoonize,
            KindColumns::ColoringPage { .. } => JobKind::ColoringPage,
        }
    }

    pub fn table(&self) -> &'static str {
        self.kind().table()
    }

    pub fn id(&self) -> JobId {
        JobId(self.common.id)
    }

    pub fn status(&self) -> Result<JobStatus, StoreError> {
        self.common
            .status
            .parse()
            .map_err(|err| StoreError::decode(self.table(), self.common.id, err))
    }

    /// Flatten a unified job into its table's columns.
    pub fn from_job(job: &Job) -> Self {
        let common = CommonColumns {
            id: job.id.0,
            owner_id: job.owner_id.clone(),
            status: job.status.as_str().to_string(),
            progress: i32::from(job.progress),
            current_step: job.current_step.clone(),
            error_message: job.error_message.clone(),
            retry_count: to_column(job.retry_count),
            max_retries: to_column(job.max_retries),
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        };

        let columns = match (&job.input, &job.result) {
            (JobInput::Story(input), result) => {
                let story = match result {
                    Some(JobResult::Story(story)) => Some(story),
                    _ => None,
                };
                KindColumns::Story {
                    prompt: input.prompt.clone(),
                    age_group: input.age_group.clone(),
                    page_count: to_column(input.page_count),
                    title: story.map(|s| s.title.clone()),
                    pages: story.map(|s| serde_json::json!(s.pages)),
                }
            }
            (JobInput::Illustration(input), result) => KindColumns::Illustration {
                prompt: input.prompt.clone(),
                style: input.style.clone(),
                width: to_column(input.width),
                height: to_column(input.height),
                image_url: image_url(result),
            },
            (JobInput::Cartoonize(input), result) => KindColumns::Cartoonize {
                source_image_url: input.source_image_url.clone(),
                style: input.style.clone(),
                image_url: image_url(result),
            },
            (JobInput::ColoringPage(input), result) => KindColumns::ColoringPage {
                subject: input.subject.clone(),
                line_detail: input.line_detail.clone(),
                image_url: image_url(result),
            },
        };

        Self { common, columns }
    }

    /// Rebuild the unified job from this row.
    ///
    /// Result columns are only read back for completed jobs.
    pub fn into_job(self) -> Result<Job, StoreError> {
        let table = self.table();
        let id = self.common.id;
        let status = self.status()?;
        let completed = status == JobStatus::Completed;
        let missing = |column: &str| {
            StoreError::decode(table, id, format!("completed row without {column}"))
        };

        let (input, result) = match self.columns {
            KindColumns::Story {
                prompt,
                age_group,
                page_count,
                title,
                pages,
            } => {
                let input = JobInput::Story(StoryInput {
                    prompt,
                    age_group,
                    page_count: from_column(page_count),
                });
                let result = if completed {
                    let title = title.ok_or_else(|| missing("title"))?;
                    let pages: Vec<String> = match pages {
                        Some(value) => serde_json::from_value(value)
                            .map_err(|err| StoreError::decode(table, id, err))?,
                        None => Vec::new(),
                    };
                    Some(JobResult::Story(StoryResult { title, pages }))
                } else {
                    None
                };
                (input, result)
            }
            KindColumns::Illustration {
                prompt,
                style,
                width,
                height,
                image_url,
            } => {
                let input = JobInput::Illustration(IllustrationInput {
                    prompt,
                    style,
                    width: from_column(width),
                    height: from_column(height),
                });
                let result = if completed {
                    let image_url = image_url.ok_or_else(|| missing("image_url"))?;
                    Some(JobResult::Illustration(ImageResult { image_url }))
                } else {
                    None
                };
                (input, result)
            }
            KindColumns::Cartoonize {
                source_image_url,
                style,
                image_url,
            } => {
                let input = JobInput::Cartoonize(CartoonizeInput {
                    source_image_url,
                    style,
                });
                let result = if completed {
                    let image_url = image_url.ok_or_else(|| missing("image_url"))?;
                    Some(JobResult::Cartoonize(ImageResult { image_url }))
                } else {
                    None
                };
                (input, result)
            }
            KindColumns::ColoringPage {
                subject,
                line_detail,
                image_url,
            } => {
                let input = JobInput::ColoringPage(ColoringPageInput {
                    subject,
                    line_detail,
                });
                let result = if completed {
                    let image_url = image_url.ok_or_else(|| missing("image_url"))?;
                    Some(JobResult::ColoringPage(ImageResult { image_url }))
                } else {
                    None
                };
                (input, result)
            }
        };

        let common = self.common;
        Ok(Job {
            id: JobId(common.id),
            owner_id: common.owner_id,
            status,
            progress: clamp_progress(common.progress),
            current_step: common.current_step,
            error_message: common.error_message,
            retry_count: from_column(common.retry_count),
            max_retries: from_column(common.max_retries),
            created_at: common.created_at,
            updated_at: common.updated_at,
            started_at: common.started_at,
            completed_at: common.completed_at,
            input,
            result,
        })
    }
}

fn image_url(result: &Option<JobResult>) -> Option<String> {
    match result {
        Some(
            JobResult::Illustration(image)
            | JobResult::Cartoonize(image)
            | JobResult::ColoringPage(image),
        ) => Some(image.image_url.clone()),
        _ => None,
    }
}

fn to_column(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn from_column(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
