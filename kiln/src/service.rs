//! Creation and query surface for the transport layer.

use std::sync::Arc;

use chrono::Utc;

use crate::job::{Job, JobFilter, JobId, JobInput, JobView};
use crate::store::{JobStore, KindTables};
use crate::telemetry;

/// Listing limit used when the filter does not carry one.
pub const DEFAULT_LIST_LIMIT: usize = 50;
/// Upper bound on any single listing.
pub const MAX_LIST_LIMIT: usize = 200;

/// Entry point for creating, inspecting and cancelling jobs.
#[derive(Debug)]
pub struct JobService<T> {
    store: Arc<JobStore<T>>,
}

impl<T> Clone for JobService<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<T: KindTables> JobService<T> {
    pub fn new(store: Arc<JobStore<T>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<JobStore<T>> {
        &self.store
    }

    /// Persist a new pending job. `None` when the row could not be written.
    ///
    /// Input is validated when the job is dispatched, not here.
    pub async fn create(&self, input: JobInput, owner_id: Option<String>) -> Option<JobId> {
        let job = Job::new(
            input,
            owner_id,
            self.store.config().default_max_retries,
            Utc::now(),
        );
        if !self.store.insert(&job).await {
            return None;
        }
        telemetry::record_job_created(job.id.to_string(), job.kind().as_str());
        Some(job.id)
    }

    pub async fn get(&self, id: JobId) -> Option<JobView> {
        self.store.find_by_id(id).await.map(JobView::from)
    }

    /// Jobs matching `filter`, newest first.
    pub async fn list(&self, filter: JobFilter) -> Vec<JobView> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .min(MAX_LIST_LIMIT);
        self.store
            .list(&filter, limit)
            .await
            .into_iter()
            .map(JobView::from)
            .collect()
    }

    /// Cancel a pending or processing job. `false` for terminal or unknown jobs.
    pub async fn cancel(&self, id: JobId) -> bool {
        self.store.cancel(id).await
    }
}
