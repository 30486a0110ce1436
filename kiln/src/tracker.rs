//! Status state machine and timestamp bookkeeping.
//!
//! ```text
//! pending --(progress > 0)--> processing --(success)--> completed
//! processing --(retryable failure)--> pending
//! processing --(terminal failure)--> failed
//! pending | processing --(cancel)--> cancelled
//! ```
//!
//! Functions here mutate a [`Job`] in memory; persisting the result is the
//! store's job. Failure transitions live in [`crate::classifier`].

use chrono::{DateTime, Utc};

use crate::job::{Job, JobResult, JobStatus};

pub const STEP_COMPLETED: &str = "Completed";
pub const STEP_CANCELLED: &str = "Cancelled";

/// Outcome of applying a transition to a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
    /// The job changed and must be written back.
    Applied,
    /// The request was already satisfied; nothing to write.
    Unchanged,
    /// The transition is not allowed from the current state.
    Rejected,
}

impl Transition {
    /// Whether the caller should report success.
    pub fn accepted(&self) -> bool {
        !matches!(self, Transition::Rejected)
    }
}

pub fn clamp_progress(progress: i32) -> u8 {
    progress.clamp(0, 100) as u8
}

/// Record progress for a running (or about to run) job.
///
/// Any positive value moves `pending` to `processing` and stamps
/// `started_at` the first time. While processing, progress never moves
/// backwards.
pub fn apply_progress(
    job: &mut Job,
    progress: i32,
    step: Option<&str>,
    now: DateTime<Utc>,
) -> Transition {
    if job.status.is_terminal() {
        return Transition::Rejected;
    }

    let mut value = clamp_progress(progress);
    if job.status == JobStatus::Processing {
        value = value.max(job.progress);
    }

    if value > 0 {
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Processing;
        }
        if job.started_at.is_none() {
            job.started_at = Some(now);
        }
    }

    job.progress = value;
    if let Some(step) = step {
        job.current_step = Some(step.to_string());
    }
    job.updated_at = now;
    Transition::Applied
}

/// Mark a job completed with its result.
///
/// A second completion leaves `completed_at` untouched. Completion after an
/// external cancel still lands: the store is last-write-wins.
pub fn apply_completion(
    job: &mut Job,
    result: JobResult,
    now: DateTime<Utc>,
) -> Transition {
    if result.kind() != job.kind() {
        return Transition::Rejected;
    }
    if job.status == JobStatus::Completed {
        return Transition::Unchanged;
    }

    job.status = JobStatus::Completed;
    job.progress = 100;
    job.current_step = Some(STEP_COMPLETED.to_string());
    job.error_message = None;
    job.result = Some(result);
    job.completed_at = Some(now);
    job.updated_at = now;
    Transition::Applied
}

/// Cancel a job that has not reached a terminal state.
pub fn apply_cancel(job: &mut Job, now: DateTime<Utc>) -> Transition {
    if job.status.is_terminal() {
        return Transition::Rejected;
    }

    job.status = JobStatus::Cancelled;
    job.current_step = Some(STEP_CANCELLED.to_string());
    job.completed_at = Some(now);
    job.updated_at = now;
    Transition::Applied
}
