/// In-memory admission set bounding concurrent executions.
pub mod admission;
/// Builder for constructing processors.
pub mod builder;
/// Generation collaborator trait and the per-kind generator set.
pub mod generator;
/// Progress reporting handle passed to generators.
pub mod reporter;
/// Processor counters and health.
pub mod stats;
/// Scan loop, dispatch, stale sweep and lifecycle.
pub mod supervisor;

pub use admission::{Admission, AdmissionEntry, AdmissionSet};
pub use builder::JobProcessorBuilder;
pub use generator::{
    CartoonizeGenerator, ColoringPageGenerator, Generator, GeneratorSet, IllustrationGenerator,
    StoryGenerator,
};
pub use reporter::{ProgressReporter, ProgressSink};
pub use stats::{HealthStatus, MetricsSnapshot, ProcessorMetrics};
pub use supervisor::{JobProcessor, ScanReport, ScanSkip, ShutdownToken};
