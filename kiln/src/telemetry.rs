//! Tracing and telemetry instrumentation for kiln.
//!
//! Span helpers for the processor and store, plus `record_*` functions that
//! log a lifecycle event and, with the `metrics` feature, feed the matching
//! Prometheus series. Everything here is a plain log line when the feature is
//! off.
//!
//! # Example
//!
//! ```ignore
//! use kiln::telemetry::{instrument_dispatch, record_job_start};
//!
//! let timing = record_job_start(job_id.to_string());
//! instrument_dispatch(job_id.to_string(), "story", run(job)).await;
//! ```

use std::future::Future;
use tracing::{info_span, Instrument, Span};

/// Span covering one dispatched job execution.
#[must_use]
pub fn job_dispatch_span(job_id: impl AsRef<str>, kind: impl AsRef<str>) -> Span {
    info_span!(
        "kiln.dispatch",
        job_id = %job_id.as_ref(),
        job_kind = %kind.as_ref(),
    )
}

/// Span covering one scan tick.
#[must_use]
pub fn scan_span(batch_size: usize, in_flight: usize) -> Span {
    info_span!("kiln.scan", batch_size = batch_size, in_flight = in_flight)
}

/// Span covering one stale admission sweep.
#[must_use]
pub fn sweep_span(threshold_secs: u64) -> Span {
    info_span!("kiln.sweep", threshold_secs = threshold_secs)
}

/// Span covering a read-modify-write against the store.
#[must_use]
pub fn store_span(job_id: impl AsRef<str>, operation: &'static str) -> Span {
    info_span!(
        "kiln.store",
        job_id = %job_id.as_ref(),
        operation = operation,
    )
}

/// Instrument a future with a job dispatch span.
pub fn instrument_dispatch<F>(
    job_id: impl AsRef<str>,
    job_kind: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let span = job_dispatch_span(job_id, job_kind);
    future.instrument(span)
}

/// Record a newly created job.
pub fn record_job_created(job_id: impl AsRef<str>, job_kind: impl AsRef<str>) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        job_kind = %job_kind.as_ref(),
        "job created"
    );
}

/// Record the final outcome of one execution attempt.
///
/// `status` is one of `completed`, `retrying`, `failed`.
pub fn record_job_completed(job_kind: impl AsRef<str>, status: impl AsRef<str>) {
    tracing::info!(
        job_kind = %job_kind.as_ref(),
        status = %status.as_ref(),
        "job attempt finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_completed(job_kind.as_ref(), status.as_ref());
}

/// Record a classified failure.
pub fn record_job_failure(
    job_kind: impl AsRef<str>,
    category: impl AsRef<str>,
    collaborator: impl AsRef<str>,
) {
    tracing::warn!(
        job_kind = %job_kind.as_ref(),
        category = %category.as_ref(),
        collaborator = %collaborator.as_ref(),
        "job failure recorded"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_failure(job_kind.as_ref(), category.as_ref());
}

/// Update the in-flight gauge.
pub fn set_in_flight(in_flight: usize) {
    tracing::debug!(in_flight = in_flight, "in-flight jobs updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_in_flight(in_flight as f64);
}

/// Observe the duration of a job execution.
pub fn observe_job_duration(
    job_kind: impl AsRef<str>,
    status: impl AsRef<str>,
    duration_secs: f64,
) {
    tracing::debug!(
        job_kind = %job_kind.as_ref(),
        status = %status.as_ref(),
        duration_secs = duration_secs,
        "job duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_job_duration(job_kind.as_ref(), status.as_ref(), duration_secs);
}

/// Record the start of job execution for duration tracking.
///
/// Returns an opaque handle that should be passed to `record_job_end`.
pub fn record_job_start(job_id: impl AsRef<str>) -> JobTimingHandle {
    JobTimingHandle {
        job_id: job_id.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

/// Record the end of job execution and update duration metrics.
pub fn record_job_end(
    handle: JobTimingHandle,
    job_kind: impl AsRef<str>,
    status: impl AsRef<str>,
) {
    let duration_secs = handle.start.elapsed().as_secs_f64();
    observe_job_duration(job_kind, status, duration_secs);
}

/// Handle for tracking job execution duration.
///
/// This is an opaque type returned by `record_job_start` and consumed by `record_job_end`.
#[derive(Debug)]
pub struct JobTimingHandle {
    job_id: String,
    start: std::time::Instant,
}

impl JobTimingHandle {
    /// Get the job ID associated with this timing handle.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Get the elapsed time since the job started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_names() {
        let cases = [
            (job_dispatch_span("job-123", "story"), "kiln.dispatch"),
            (scan_span(10, 2), "kiln.scan"),
            (sweep_span(600), "kiln.sweep"),
            (store_span("job-123", "cancel"), "kiln.store"),
        ];
        for (span, expected) in cases {
            // Disabled spans carry no metadata when no subscriber is installed.
            if let Some(metadata) = span.metadata() {
                assert_eq!(metadata.name(), expected);
            }
        }
    }

    #[test]
    fn test_timing_handle() {
        let handle = record_job_start("job-123");
        assert_eq!(handle.job_id(), "job-123");

        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(handle.elapsed().as_nanos() > 0);

        record_job_end(handle, "illustration", "completed");
    }

    #[tokio::test]
    async fn test_instrument_dispatch_passes_output_through() {
        let out = instrument_dispatch("job-1", "cartoonize", async { 7 }).await;
        assert_eq!(out, 7);
    }
}
