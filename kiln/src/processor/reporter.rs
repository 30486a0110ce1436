use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::job::JobId;
use crate::store::{JobStore, KindTables};

use super::admission::AdmissionSet;

/// Where progress reports land.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report_progress(&self, id: JobId, progress: i32, step: Option<&str>) -> bool;
}

#[async_trait]
impl<T: KindTables> ProgressSink for JobStore<T> {
    async fn report_progress(&self, id: JobId, progress: i32, step: Option<&str>) -> bool {
        self.update_progress(id, progress, step).await
    }
}

/// Handle passed into each generator call so it can report progress for
/// the job it is working on.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    sink: Arc<dyn ProgressSink>,
    admission: Option<Arc<AdmissionSet>>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    pub fn new(job_id: JobId, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            job_id,
            sink,
            admission: None,
        }
    }

    pub(crate) fn with_admission(mut self, admission: Arc<AdmissionSet>) -> Self {
        self.admission = Some(admission);
        self
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Record progress (clamped to 0..=100) and optionally the current step.
    ///
    /// Returns `false` when the job is gone, already terminal, or the write
    /// failed.
    pub async fn report(&self, progress: i32, step: Option<&str>) -> bool {
        let accepted = self.sink.report_progress(self.job_id, progress, step).await;
        if !accepted {
            tracing::debug!(job_id = %self.job_id, progress, "progress update not applied");
        }
        accepted
    }

    /// Note that a generation collaborator is being called for this job.
    pub fn touch(&self, collaborator: &str) {
        if let Some(admission) = &self.admission {
            admission.touch(self.job_id, collaborator);
        }
    }
}
