//! Translation between the unified [`Job`] model and per-kind tables.
//!
//! [`KindTables`] is the physical layer: one table per [`JobKind`], rows in
//! the kind-specific [`JobRow`] shape. [`JobStore`] routes every operation to
//! the right table. Because a job id does not encode its kind, resolving an
//! id probes the tables in [`JobKind::ALL`] order.
//!
//! Nothing below this boundary escapes it: storage errors are logged and
//! reported as `false`, `None` or an empty list.

mod row;

pub use row::{CommonColumns, JobRow, KindColumns};

use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn, Instrument};

use crate::classifier::{self, RetryDecision};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::job::{Job, JobFilter, JobId, JobKind, JobResult, JobStatus};
use crate::telemetry;
use crate::tracker::{self, Transition};

/// Physical storage with one table per job kind.
///
/// Implementations report an absent row as `Ok(None)` / `Ok(false)`; `Err`
/// is reserved for genuine storage failures.
#[async_trait]
pub trait KindTables: Send + Sync {
    /// Fetch a single row from `kind`'s table.
    async fn fetch(&self, kind: JobKind, id: JobId) -> Result<Option<JobRow>, StoreError>;

    /// Pending rows of `kind` matching `filter`, oldest `created_at` first.
    async fn fetch_pending(
        &self,
        kind: JobKind,
        filter: &JobFilter,
        limit: usize,
    ) -> Result<Vec<JobRow>, StoreError>;

    /// Rows of `kind` matching `filter`, newest `created_at` first.
    async fn fetch_filtered(
        &self,
        kind: JobKind,
        filter: &JobFilter,
        limit: usize,
    ) -> Result<Vec<JobRow>, StoreError>;

    /// Insert a new row into its kind's table.
    async fn insert(&self, row: &JobRow) -> Result<(), StoreError>;

    /// Overwrite an existing row. Returns `false` when no row matched.
    async fn update(&self, row: &JobRow) -> Result<bool, StoreError>;
}

/// Routes unified job operations to per-kind tables.
pub struct JobStore<T> {
    tables: T,
    config: StoreConfig,
    kind_index: Mutex<HashMap<JobId, JobKind>>,
}

impl<T> std::fmt::Debug for JobStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("tables", &std::any::type_name::<T>())
            .field("config", &self.config)
            .field("indexed_ids", &self.kind_index.lock().len())
            .finish()
    }
}

impl<T: KindTables> JobStore<T> {
    pub fn new(tables: T, config: StoreConfig) -> Self {
        Self {
            tables,
            config,
            kind_index: Mutex::new(HashMap::new()),
        }
    }

    pub fn tables(&self) -> &T {
        &self.tables
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn remember_kind(&self, id: JobId, kind: JobKind) {
        if self.config.kind_index {
            self.kind_index.lock().insert(id, kind);
        }
    }

    fn forget_kind(&self, id: JobId) {
        if self.config.kind_index {
            self.kind_index.lock().remove(&id);
        }
    }

    /// Number of ids currently held in the kind index.
    pub fn indexed_ids(&self) -> usize {
        self.kind_index.lock().len()
    }

    fn indexed_kind(&self, id: JobId) -> Option<JobKind> {
        if !self.config.kind_index {
            return None;
        }
        self.kind_index.lock().get(&id).copied()
    }

    /// Persist a freshly created job.
    pub async fn insert(&self, job: &Job) -> bool {
        let row = JobRow::from_job(job);
        match self.tables.insert(&row).await {
            Ok(()) => {
                self.remember_kind(job.id, job.kind());
                debug!(job_id = %job.id, table = row.table(), "job row inserted");
                true
            }
            Err(err) => {
                warn!(job_id = %job.id, table = row.table(), error = %err, "job insert failed");
                false
            }
        }
    }

    /// Resolve a job id to its record, surfacing storage failures.
    ///
    /// Probes every kind's table in order and stops at the first hit. A
    /// storage error on one table does not stop the probe; it is returned
    /// only when no table produced the row.
    pub async fn try_find_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let hinted = self.indexed_kind(id);
        let mut first_error = None;

        let order = hinted
            .into_iter()
            .chain(JobKind::ALL.into_iter().filter(|kind| Some(*kind) != hinted));

        for kind in order {
            match self.tables.fetch(kind, id).await {
                Ok(Some(row)) => {
                    let job = row.into_job()?;
                    if job.status.is_terminal() {
                        self.forget_kind(id);
                    } else {
                        self.remember_kind(id, kind);
                    }
                    return Ok(Some(job));
                }
                Ok(None) => {
                    if hinted == Some(kind) {
                        debug!(job_id = %id, kind = %kind, "stale kind index entry");
                    }
                }
                Err(err) => {
                    warn!(job_id = %id, kind = %kind, error = %err, "table probe failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    /// Resolve a job id to its record. Storage failures read as not-found.
    pub async fn find_by_id(&self, id: JobId) -> Option<Job> {
        match self.try_find_by_id(id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    job_id = %id,
                    error = %err,
                    retryable = err.is_retryable(),
                    "job lookup failed"
                );
                None
            }
        }
    }

    /// Oldest pending jobs with per-kind fairness.
    ///
    /// Each kind contributes at most `ceil(limit / kinds)` rows; the merged
    /// set is sorted by `created_at` and truncated to `limit`. The result is
    /// approximately, not strictly, FIFO across kinds.
    pub async fn list_pending(&self, filter: &JobFilter, limit: usize) -> Vec<Job> {
        if limit == 0 {
            return Vec::new();
        }

        let kinds = filter.kinds();
        let per_kind = limit.div_ceil(kinds.len());
        let mut jobs = Vec::with_capacity(per_kind * kinds.len());

        for kind in kinds {
            match self.tables.fetch_pending(kind, filter, per_kind).await {
                Ok(rows) => jobs.extend(self.decode_rows(rows, true)),
                Err(err) => {
                    warn!(kind = %kind, error = %err, "pending fetch failed; skipping kind");
                }
            }
        }

        jobs.sort_by_key(|job| job.created_at);
        jobs.truncate(limit);
        jobs
    }

    /// Jobs matching `filter` across kinds, newest first.
    pub async fn list(&self, filter: &JobFilter, limit: usize) -> Vec<Job> {
        if limit == 0 {
            return Vec::new();
        }

        let mut jobs = Vec::new();
        for kind in filter.kinds() {
            match self.tables.fetch_filtered(kind, filter, limit).await {
                Ok(rows) => jobs.extend(self.decode_rows(rows, false)),
                Err(err) => {
                    warn!(kind = %kind, error = %err, "listing failed; skipping kind");
                }
            }
        }

        jobs.sort_by_key(|job| Reverse(job.created_at));
        jobs.truncate(limit);
        jobs
    }

    /// Decode fetched rows, skipping malformed ones. Pending scans index
    /// what they return; plain listings do not.
    fn decode_rows(&self, rows: Vec<JobRow>, index: bool) -> Vec<Job> {
        rows.into_iter()
            .filter_map(|row| {
                let id = row.id();
                let kind = row.kind();
                match row.into_job() {
                    Ok(job) => {
                        if index {
                            self.remember_kind(id, kind);
                        }
                        Some(job)
                    }
                    Err(err) => {
                        warn!(job_id = %id, error = %err, "skipping undecodable row");
                        None
                    }
                }
            })
            .collect()
    }

    /// Record progress; moves `pending` to `processing` on the first
    /// positive value.
    pub async fn update_progress(&self, id: JobId, progress: i32, step: Option<&str>) -> bool {
        self.modify(id, "update_progress", |job, now| {
            let transition = tracker::apply_progress(job, progress, step, now);
            (transition.accepted(), transition)
        })
        .await
        .unwrap_or(false)
    }

    /// Store a successful result. Completing an already completed job is a
    /// no-op that still reports success.
    pub async fn mark_completed(&self, id: JobId, result: JobResult) -> bool {
        self.modify(id, "mark_completed", |job, now| {
            let transition = tracker::apply_completion(job, result, now);
            (transition.accepted(), transition)
        })
        .await
        .unwrap_or(false)
    }

    /// Record a failed attempt, requeueing it when `retryable` and the
    /// job still has retries left. Terminal jobs are never requeued.
    pub async fn mark_failed(&self, id: JobId, message: &str, retryable: bool) -> bool {
        self.record_failure(id, message, retryable).await.is_some()
    }

    /// Same as [`JobStore::mark_failed`], returning the decision taken.
    pub async fn record_failure(
        &self,
        id: JobId,
        message: &str,
        retryable: bool,
    ) -> Option<RetryDecision> {
        self.modify(id, "mark_failed", |job, now| {
            match classifier::apply_failure(job, message, retryable, now) {
                Some(decision) => (Some(decision), Transition::Applied),
                None => (None, Transition::Rejected),
            }
        })
        .await
        .flatten()
    }

    /// Cancel a live job. Advisory only: an in-flight handler is not
    /// interrupted and may still write a terminal state afterwards.
    pub async fn cancel(&self, id: JobId) -> bool {
        self.modify(id, "cancel", |job, now| {
            let transition = tracker::apply_cancel(job, now);
            (transition.accepted(), transition)
        })
        .await
        .unwrap_or(false)
    }

    /// Re-resolve a job, apply `apply`, and write the row back when the
    /// transition changed it. Returns `None` when the job was not found,
    /// the transition was rejected, or the write failed.
    async fn modify<R, F>(&self, id: JobId, op: &'static str, apply: F) -> Option<R>
    where
        F: FnOnce(&mut Job, DateTime<Utc>) -> (R, Transition) + Send,
        R: Send,
    {
        let span = telemetry::store_span(id.to_string(), op);
        async move {
            let Some(mut job) = self.find_by_id(id).await else {
                debug!("job not found");
                return None;
            };

            let before = job.status;
            let (outcome, transition) = apply(&mut job, Utc::now());
            match transition {
                Transition::Rejected => {
                    debug!(status = %before, "transition rejected");
                    None
                }
                Transition::Unchanged => Some(outcome),
                Transition::Applied => {
                    if self.write(&job).await {
                        if before != job.status {
                            debug!(from = %before, to = %job.status, "job status changed");
                        }
                        if job.status.is_terminal() {
                            self.forget_kind(id);
                        }
                        Some(outcome)
                    } else {
                        None
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn write(&self, job: &Job) -> bool {
        let row = JobRow::from_job(job);
        match self.tables.update(&row).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(job_id = %job.id, table = row.table(), "row vanished before write");
                self.forget_kind(job.id);
                false
            }
            Err(err) => {
                warn!(job_id = %job.id, table = row.table(), error = %err, "job write failed");
                false
            }
        }
    }

    /// Current status of a job, if it can be resolved.
    pub async fn status_of(&self, id: JobId) -> Option<JobStatus> {
        self.find_by_id(id).await.map(|job| job.status)
    }
}
