//! Kiln - asynchronous job orchestration for content generation.
//!
//! Tracks long-running, multi-step generation jobs of several kinds, each
//! stored in its own table, and drives them through external generation
//! collaborators under a bounded concurrency budget.
//!
//! # Core Concepts
//!
//! - **Job**: a unified record ([`Job`]) whose [`JobKind`] picks the table it
//!   lives in and the [`Generator`] that executes it. Inputs and results are
//!   typed per kind ([`JobInput`], [`JobResult`]).
//!
//! - **Store**: [`JobStore`] routes every operation to the right per-kind
//!   table behind the [`KindTables`] trait. Storage failures never escape it.
//!
//! - **Tracker / Classifier**: pure transition functions for progress,
//!   completion and cancellation ([`tracker`]) and for failure categorization
//!   and retry decisions ([`classifier`]).
//!
//! - **Processor**: [`JobProcessor`] scans for pending work, admits up to
//!   `max_concurrent_jobs`, dispatches each job as its own task and sweeps
//!   stale admissions.
//!
//! - **Service**: [`JobService`] is the create/get/list/cancel surface for
//!   the transport layer.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL tables via sqlx
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kiln::*;
//!
//! let store = Arc::new(JobStore::new(tables, StoreConfig::default()));
//! let service = JobService::new(Arc::clone(&store));
//! let processor = JobProcessorBuilder::new(ProcessorConfig::default())
//!     .with_store(store)
//!     .with_generators(generators)
//!     .build()?;
//! processor.start().await?;
//!
//! let id = service.create(input, Some("user-42".into())).await;
//! ```

/// Failure categorization and retry decisions.
pub mod classifier;

/// Configuration structures for the processor, store and persistence.
pub mod config;

/// Error taxonomy for generation failures and storage errors.
pub mod error;

/// Unified job model, per-kind inputs and results, and query filters.
pub mod job;

#[cfg(feature = "metrics")]
/// Prometheus metrics, enabled with the `metrics` feature.
pub mod metrics;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides the sqlx-backed [`KindTables`]
/// implementation when the `postgres` feature is enabled.
pub mod persistence;

/// Bounded job processor: admission, dispatch, stale sweep and lifecycle.
pub mod processor;

/// Creation and query surface.
pub mod service;

/// Job store and type router over per-kind tables.
pub mod store;

/// Tracing spans and lifecycle event recording.
pub mod telemetry;

/// Status state machine and progress bookkeeping.
pub mod tracker;

pub use classifier::RetryDecision;
pub use config::*;
pub use error::{ErrorCategory, GenerationError, StoreError};
pub use job::*;
pub use processor::{
    Generator, GeneratorSet, HealthStatus, JobProcessor, JobProcessorBuilder, MetricsSnapshot,
    ProcessorMetrics, ProgressReporter, ScanReport, ScanSkip, ShutdownToken,
};
pub use service::JobService;
pub use store::{JobRow, JobStore, KindTables};
pub use tracker::Transition;
