//! Prometheus metrics instrumentation for kiln.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `kiln_jobs_completed_total` - Finished execution attempts by kind and outcome
//! - `kiln_job_failures_total` - Classified failures by kind and category
//!
//! ## Gauges
//! - `kiln_in_flight_jobs` - Jobs currently admitted by the processor
//!
//! ## Histograms
//! - `kiln_job_duration_seconds` - Job execution duration in seconds
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, Gauge, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for kiln metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `job_kind`, `status` (completed, retrying, failed).
pub static JOBS_COMPLETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "kiln_jobs_completed_total",
        "Total number of finished job execution attempts",
    );
    CounterVec::new(opts, &["job_kind", "status"])
        .expect("kiln_jobs_completed_total metric creation failed")
});

/// Labels: `job_kind`, `category`.
pub static JOB_FAILURES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "kiln_job_failures_total",
        "Total number of classified job failures",
    );
    CounterVec::new(opts, &["job_kind", "category"])
        .expect("kiln_job_failures_total metric creation failed")
});

pub static IN_FLIGHT_JOBS: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new("kiln_in_flight_jobs", "Jobs currently admitted by the processor")
        .expect("kiln_in_flight_jobs metric creation failed")
});

/// Labels: `job_kind`, `status`.
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.05, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "kiln_job_duration_seconds",
        "Job execution duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["job_kind", "status"])
        .expect("kiln_job_duration_seconds metric creation failed")
});

/// Register every metric with the global registry.
///
/// Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_COMPLETED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOB_FAILURES_TOTAL.clone()),
        Box::new(IN_FLIGHT_JOBS.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_completed(job_kind: &str, status: &str) {
    JOBS_COMPLETED_TOTAL
        .with_label_values(&[job_kind, status])
        .inc();
}

pub fn record_job_failure(job_kind: &str, category: &str) {
    JOB_FAILURES_TOTAL
        .with_label_values(&[job_kind, category])
        .inc();
}

pub fn set_in_flight(in_flight: f64) {
    IN_FLIGHT_JOBS.set(in_flight);
}

pub fn observe_job_duration(job_kind: &str, status: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[job_kind, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
