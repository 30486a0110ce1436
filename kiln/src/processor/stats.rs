use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;

/// Below this many processed jobs the failure ratio is not trusted.
const HEALTH_MIN_SAMPLE: u64 = 10;
const DEGRADED_FAILURE_RATIO: f64 = 0.5;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Counters shared between the processor and its spawned executions.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    total_processed: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    stale_evictions: AtomicU64,
    peak_concurrency: AtomicUsize,
    failures_by_category: Mutex<BTreeMap<ErrorCategory, u64>>,
    failures_by_collaborator: Mutex<BTreeMap<String, u64>>,
}

/// Point-in-time copy of [`ProcessorMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub stale_evictions: u64,
    pub peak_concurrency: usize,
    pub failures_by_category: BTreeMap<ErrorCategory, u64>,
    pub failures_by_collaborator: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn failure_ratio(&self) -> f64 {
        if self.total_processed == 0 {
            return 0.0;
        }
        self.failed as f64 / self.total_processed as f64
    }

    pub fn health(&self) -> HealthStatus {
        if self.total_processed >= HEALTH_MIN_SAMPLE
            && self.failure_ratio() >= DEGRADED_FAILURE_RATIO
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, category: ErrorCategory, collaborator: Option<&str>) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        if category == ErrorCategory::Timeout {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }

        *self.failures_by_category.lock().entry(category).or_default() += 1;
        if let Some(name) = collaborator {
            *self
                .failures_by_collaborator
                .lock()
                .entry(name.to_string())
                .or_default() += 1;
        }
    }

    pub fn record_stale_evictions(&self, count: usize) {
        self.stale_evictions
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn observe_concurrency(&self, in_flight: usize) {
        self.peak_concurrency.fetch_max(in_flight, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            stale_evictions: self.stale_evictions.load(Ordering::Relaxed),
            peak_concurrency: self.peak_concurrency.load(Ordering::Relaxed),
            failures_by_category: self.failures_by_category.lock().clone(),
            failures_by_collaborator: self.failures_by_collaborator.lock().clone(),
        }
    }

    /// Degraded once at least half of a meaningful sample has failed.
    pub fn health(&self) -> HealthStatus {
        self.snapshot().health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = ProcessorMetrics::new();
        metrics.record_success();
        metrics.record_failure(ErrorCategory::AiService, Some("story-writer"));
        metrics.record_failure(ErrorCategory::Timeout, Some("story-writer"));
        metrics.record_failure(ErrorCategory::Validation, None);
        metrics.observe_concurrency(3);
        metrics.observe_concurrency(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_processed, 4);
        assert_eq!(snap.successful, 1);
        assert_eq!(snap.failed, 3);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.peak_concurrency, 3);
        assert_eq!(snap.failures_by_category[&ErrorCategory::AiService], 1);
        assert_eq!(snap.failures_by_collaborator["story-writer"], 2);
    }

    #[test]
    fn test_health_needs_a_sample() {
        let metrics = ProcessorMetrics::new();
        for _ in 0..5 {
            metrics.record_failure(ErrorCategory::Unknown, None);
        }
        assert_eq!(metrics.health(), HealthStatus::Healthy);

        for _ in 0..5 {
            metrics.record_success();
        }
        assert_eq!(metrics.health(), HealthStatus::Degraded);

        metrics.record_success();
        assert_eq!(metrics.health(), HealthStatus::Healthy);
    }

    #[test]
    fn test_snapshot_serializes_category_keys() {
        let metrics = ProcessorMetrics::new();
        metrics.record_failure(ErrorCategory::Storage, None);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["failures_by_category"]["storage"], 1);
    }
}
