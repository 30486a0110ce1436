use chrono::{DateTime, Utc};

use crate::error::{ErrorCategory, GenerationError};
use crate::job::{Job, JobStatus};

pub const STEP_FAILED: &str = "Failed after retries";

/// Message fragments that identify each category, checked in
/// [`ErrorCategory::PRIORITY`] order.
const TIMEOUT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline exceeded",
    "etimedout",
];
const AI_SERVICE_MARKERS: &[&str] = &[
    "ai service",
    "openai",
    "anthropic",
    "replicate",
    "stability",
    "model",
    "rate limit",
    "overloaded",
    "content policy",
    "generation failed",
];
const DATABASE_MARKERS: &[&str] = &[
    "database",
    "sql",
    "postgres",
    "connection pool",
    "deadlock",
    "constraint",
];
const STORAGE_MARKERS: &[&str] = &["storage", "bucket", "upload", "s3", "object store"];
const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "authentication",
    "api key",
    "permission denied",
    "401",
    "403",
];
const VALIDATION_MARKERS: &[&str] = &[
    "validation",
    "invalid",
    "required",
    "must be",
    "malformed",
];

fn markers(category: ErrorCategory) -> &'static [&'static str] {
    match category {
        ErrorCategory::Timeout => TIMEOUT_MARKERS,
        ErrorCategory::AiService => AI_SERVICE_MARKERS,
        ErrorCategory::Database => DATABASE_MARKERS,
        ErrorCategory::Storage => STORAGE_MARKERS,
        ErrorCategory::Auth => AUTH_MARKERS,
        ErrorCategory::Validation => VALIDATION_MARKERS,
        ErrorCategory::Unknown => &[],
    }
}

/// Assign a category to a handler failure.
///
/// Explicit metadata on the error wins. Otherwise the message and code are
/// matched against each category's markers in priority order.
pub fn classify(error: &GenerationError) -> ErrorCategory {
    if let Some(category) = error.category {
        return category;
    }

    let mut haystack = error.message.to_lowercase();
    if let Some(code) = &error.code {
        haystack.push(' ');
        haystack.push_str(&code.to_lowercase());
    }

    ErrorCategory::PRIORITY
        .into_iter()
        .find(|category| {
            markers(*category)
                .iter()
                .any(|marker| haystack.contains(marker))
        })
        .unwrap_or(ErrorCategory::Unknown)
}

/// Whether a failure of this category should be offered for retry.
pub fn retry_requested(category: ErrorCategory, retries_enabled: bool) -> bool {
    retries_enabled && category.is_retryable()
}

/// What happens to a job after a failed attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// Requeued as pending for attempt `attempt` of `max_retries`.
    Retry { attempt: u32, max_retries: u32 },
    /// Moved to the terminal `failed` state.
    Fail,
}

/// Decide between requeue and terminal failure.
///
/// Retry only when the caller asked for it and another attempt still fits
/// within `max_retries`.
pub fn decide(retryable: bool, retry_count: u32, max_retries: u32) -> RetryDecision {
    let attempt = retry_count.saturating_add(1);
    if retryable && attempt <= max_retries {
        RetryDecision::Retry {
            attempt,
            max_retries,
        }
    } else {
        RetryDecision::Fail
    }
}

pub fn retry_step(attempt: u32, max_retries: u32) -> String {
    format!("Retrying ({attempt}/{max_retries})")
}

/// Apply a failed attempt to a job and return the decision taken.
///
/// `retry_count` never exceeds `max_retries`: a terminal failure counts the
/// attempt only while there is headroom for it. Jobs already in a terminal
/// state are left untouched and yield `None`.
pub fn apply_failure(
    job: &mut Job,
    message: &str,
    retryable: bool,
    now: DateTime<Utc>,
) -> Option<RetryDecision> {
    if job.status.is_terminal() {
        return None;
    }

    let decision = decide(retryable, job.retry_count, job.max_retries);

    match decision {
        RetryDecision::Retry {
            attempt,
            max_retries,
        } => {
            job.status = JobStatus::Pending;
            job.progress = 0;
            job.retry_count = attempt;
            job.current_step = Some(retry_step(attempt, max_retries));
            job.completed_at = None;
        }
        RetryDecision::Fail => {
            job.status = JobStatus::Failed;
            job.retry_count = job.retry_count.saturating_add(1).min(job.max_retries);
            job.current_step = Some(STEP_FAILED.to_string());
            job.completed_at = Some(now);
        }
    }

    job.error_message = Some(message.to_string());
    job.result = None;
    job.updated_at = now;
    Some(decision)
}
