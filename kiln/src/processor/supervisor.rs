use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn, Instrument};

use crate::classifier::{self, RetryDecision};
use crate::config::ProcessorConfig;
use crate::error::{ErrorCategory, GenerationError};
use crate::job::{Job, JobFilter, JobId, JobKind, JobResult};
use crate::store::{JobStore, KindTables};
use crate::telemetry;

use super::admission::{Admission, AdmissionEntry, AdmissionSet};
use super::generator::GeneratorSet;
use super::reporter::{ProgressReporter, ProgressSink};
use super::stats::{MetricsSnapshot, ProcessorMetrics};

/// Token for signaling graceful shutdown to the processor loops.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a scan tick did no work.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanSkip {
    /// Another scan was still running.
    InProgress,
    /// Every slot was taken before the store was queried.
    AtCapacity,
}

/// What a single scan tick did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub skipped: Option<ScanSkip>,
    /// Pending jobs returned by the store.
    pub fetched: usize,
    pub admitted: Vec<JobId>,
    /// Jobs already executing in this process.
    pub duplicates: usize,
    /// Jobs left for a later tick because capacity ran out.
    pub capacity_skipped: usize,
}

impl ScanReport {
    fn skipped(reason: ScanSkip) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Resets the scan flag when a scan ends, including by cancellation.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Frees a job's admission slot when its execution ends, including by panic.
struct SlotGuard<'a> {
    admission: &'a AdmissionSet,
    id: JobId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.admission.release(self.id);
        telemetry::set_in_flight(self.admission.len());
    }
}

struct ProcessorCore<T: KindTables> {
    config: ProcessorConfig,
    store: Arc<JobStore<T>>,
    generators: GeneratorSet,
    admission: Arc<AdmissionSet>,
    metrics: Arc<ProcessorMetrics>,
    scanning: AtomicBool,
}

impl<T: KindTables + 'static> ProcessorCore<T> {
    async fn scan_once(self: &Arc<Self>) -> ScanReport {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("scan already running; skipping tick");
            return ScanReport::skipped(ScanSkip::InProgress);
        }
        let _guard = ScanGuard(&self.scanning);

        if self.admission.is_full() {
            debug!(in_flight = self.admission.len(), "at capacity; skipping tick");
            return ScanReport::skipped(ScanSkip::AtCapacity);
        }

        let span = telemetry::scan_span(self.config.scan_batch_size, self.admission.len());
        async {
            let jobs = self
                .store
                .list_pending(&JobFilter::default(), self.config.scan_batch_size)
                .await;

            let mut report = ScanReport {
                fetched: jobs.len(),
                ..ScanReport::default()
            };

            let total = jobs.len();
            for (index, job) in jobs.into_iter().enumerate() {
                match self.admission.try_admit(job.id, job.kind()) {
                    Admission::Admitted { in_flight } => {
                        self.metrics.observe_concurrency(in_flight);
                        telemetry::set_in_flight(in_flight);
                        report.admitted.push(job.id);
                        self.dispatch(job);
                    }
                    Admission::Duplicate => {
                        debug!(job_id = %job.id, "job already in flight");
                        report.duplicates += 1;
                    }
                    Admission::AtCapacity => {
                        report.capacity_skipped = total - index;
                        break;
                    }
                }
            }

            if !report.admitted.is_empty() {
                info!(
                    fetched = report.fetched,
                    admitted = report.admitted.len(),
                    in_flight = self.admission.len(),
                    "dispatched pending jobs"
                );
            }
            report
        }
        .instrument(span)
        .await
    }

    fn dispatch(self: &Arc<Self>, job: Job) {
        let core = Arc::clone(self);
        let id = job.id.to_string();
        let kind = job.kind().as_str();
        tokio::spawn(telemetry::instrument_dispatch(id, kind, async move {
            core.execute(job).await;
        }));
    }

    async fn execute(&self, job: Job) {
        let id = job.id;
        let kind = job.kind();
        let _slot = SlotGuard {
            admission: &self.admission,
            id,
        };
        let timing = telemetry::record_job_start(id.to_string());

        let sink: Arc<dyn ProgressSink> = self.store.clone();
        let reporter =
            ProgressReporter::new(id, sink).with_admission(Arc::clone(&self.admission));

        if !reporter.report(1, Some(&format!("Starting {kind}"))).await {
            debug!(job_id = %id, "job no longer runnable; releasing admission");
            return;
        }

        // A panicking generator surfaces as a JoinError instead of unwinding here.
        let generators = self.generators.clone();
        let mut generation = tokio::spawn(
            async move { generators.run(job.input, &reporter).await }.in_current_span(),
        );

        let timeout = self.config.job_timeout();
        let outcome = match tokio::time::timeout(timeout, &mut generation).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Err(GenerationError::categorized(
                ErrorCategory::Unknown,
                format!("generator task failed: {join_err}"),
            )
            .with_collaborator(self.generators.collaborator(kind))),
            Err(_) => {
                generation.abort();
                Err(GenerationError::timeout(format!(
                    "job exceeded timeout of {}s",
                    timeout.as_secs()
                ))
                .with_collaborator(self.generators.collaborator(kind)))
            }
        };

        let status = match outcome {
            Ok(result) => self.complete(id, result).await,
            Err(err) => self.fail(id, kind, err).await,
        };

        telemetry::record_job_completed(kind.as_str(), status);
        telemetry::record_job_end(timing, kind.as_str(), status);
    }

    async fn complete(&self, id: JobId, result: JobResult) -> &'static str {
        if self.store.mark_completed(id, result).await {
            self.metrics.record_success();
            debug!(job_id = %id, "job completed");
            "completed"
        } else {
            warn!(job_id = %id, "could not record job completion");
            self.metrics.record_failure(ErrorCategory::Database, None);
            "failed"
        }
    }

    async fn fail(&self, id: JobId, kind: JobKind, err: GenerationError) -> &'static str {
        let category = classifier::classify(&err);
        let retry = classifier::retry_requested(category, self.config.retry_failures);
        let collaborator = err.collaborator.as_deref();

        self.metrics.record_failure(category, collaborator);
        telemetry::record_job_failure(
            kind.as_str(),
            category.as_str(),
            collaborator.unwrap_or("none"),
        );

        match self.store.record_failure(id, &err.message, retry).await {
            Some(RetryDecision::Retry {
                attempt,
                max_retries,
            }) => {
                warn!(
                    job_id = %id,
                    category = %category,
                    attempt,
                    max_retries,
                    error = %err,
                    "job failed; requeued for retry"
                );
                "retrying"
            }
            Some(RetryDecision::Fail) => {
                warn!(job_id = %id, category = %category, error = %err, "job failed");
                "failed"
            }
            None => {
                warn!(
                    job_id = %id,
                    error = %err,
                    "job failure not recorded; job is terminal or missing"
                );
                "failed"
            }
        }
    }

    fn sweep_stale(&self) -> Vec<(JobId, AdmissionEntry)> {
        let threshold = self.config.stale_threshold();
        let span = telemetry::sweep_span(threshold.as_secs());
        let _enter = span.enter();

        let evicted = self.admission.sweep_stale(threshold);
        for (id, entry) in &evicted {
            warn!(
                job_id = %id,
                job_kind = %entry.kind,
                age_secs = entry.age().as_secs(),
                collaborators = ?entry.collaborators,
                "evicted stale admission"
            );
        }
        if !evicted.is_empty() {
            self.metrics.record_stale_evictions(evicted.len());
            telemetry::set_in_flight(self.admission.len());
            info!(evicted = evicted.len(), "stale sweep finished");
        }
        evicted
    }
}

/// Pulls pending jobs from the store and executes them under a fixed
/// concurrency budget.
///
/// Each scan returns as soon as its jobs are dispatched; executions run as
/// independent tasks and release their admission slot when they finish.
pub struct JobProcessor<T: KindTables + 'static> {
    core: Arc<ProcessorCore<T>>,
    shutdown_token: ShutdownToken,
    started: AtomicBool,
    loop_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<T: KindTables + 'static> fmt::Debug for JobProcessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobProcessor")
            .field("config", &self.core.config)
            .field("generators", &self.core.generators)
            .field("in_flight", &self.core.admission.len())
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl<T: KindTables + 'static> JobProcessor<T> {
    pub fn new(
        config: ProcessorConfig,
        store: Arc<JobStore<T>>,
        generators: GeneratorSet,
        metrics: Arc<ProcessorMetrics>,
    ) -> Self {
        let admission = Arc::new(AdmissionSet::new(config.max_concurrent_jobs));
        Self {
            core: Arc::new(ProcessorCore {
                config,
                store,
                generators,
                admission,
                metrics,
                scanning: AtomicBool::new(false),
            }),
            shutdown_token: ShutdownToken::new(),
            started: AtomicBool::new(false),
            loop_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.core.config
    }

    pub fn store(&self) -> Arc<JobStore<T>> {
        Arc::clone(&self.core.store)
    }

    pub fn metrics(&self) -> Arc<ProcessorMetrics> {
        Arc::clone(&self.core.metrics)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    pub fn admission(&self) -> &AdmissionSet {
        &self.core.admission
    }

    pub fn in_flight(&self) -> usize {
        self.core.admission.len()
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown_token.clone()
    }

    /// Run one scan tick: fetch pending work and dispatch what fits.
    pub async fn scan_once(&self) -> ScanReport {
        self.core.scan_once().await
    }

    /// Evict admission entries older than the stale threshold.
    ///
    /// The evicted executions keep running; only their slots are freed.
    pub fn sweep_stale(&self) -> Vec<(JobId, AdmissionEntry)> {
        self.core.sweep_stale()
    }

    /// Spawn the scan loop and the stale sweeper.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("job processor already started");
        }
        if self.shutdown_token.is_cancelled() {
            anyhow::bail!("job processor has been shut down");
        }

        let scanner = self.spawn_scanner();
        let sweeper = self.spawn_sweeper();
        self.loop_handles.lock().await.extend([scanner, sweeper]);

        info!(
            max_concurrent_jobs = self.core.config.max_concurrent_jobs,
            poll_interval_ms = self.core.config.poll_interval_ms,
            "job processor started"
        );
        Ok(())
    }

    /// Stop scanning and sweeping. In-flight executions are left to finish.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!("initiating graceful shutdown of job processor");

        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.loop_handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(tokio::time::Duration::from_secs(30), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("processor loop failed: {:?}", e),
                Err(_) => warn!("processor loop timed out during shutdown"),
            }
        }

        info!(
            in_flight = self.core.admission.len(),
            "job processor shutdown complete"
        );
        Ok(())
    }

    fn spawn_scanner(&self) -> tokio::task::JoinHandle<()> {
        let core = Arc::clone(&self.core);
        let shutdown = self.shutdown_token.clone();
        let mut ticker = tokio::time::interval(core.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("scan loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        core.scan_once().await;
                    }
                }
            }
        })
    }

    fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let core = Arc::clone(&self.core);
        let shutdown = self.shutdown_token.clone();
        let interval = core.config.stale_sweep_interval();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("stale sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        core.sweep_stale();
                    }
                }
            }
        })
    }
}
